//! Planner: turn a spec into tasks, agents and a dependency graph, seeded
//! with prior-run context from the build memory.
//!
//! Planning is deterministic: one build task per requirement (chained in
//! order), a tester task when the workflow asks for testing, a reviewer
//! task when review is enabled. Malformed outcomes fail with `PLAN_INVALID`
//! before the executor ever starts.

use anyhow::{anyhow, Result};

use crate::dag::TaskGraph;
use crate::memory::PlannerContextEntry;
use crate::spec::{AgentRole, ProjectSpec};
use crate::task::{Agent, Task};

#[derive(Debug)]
pub struct Plan {
    pub tasks: Vec<Task>,
    pub agents: Vec<Agent>,
    pub graph: TaskGraph,
    pub explanation: String,
}

pub fn plan(spec: &ProjectSpec, memory_context: &[PlannerContextEntry]) -> Result<Plan> {
    if !spec.is_viable() {
        return Err(anyhow!("PLAN_INVALID: spec has no goal"));
    }
    if spec.agents.is_empty() {
        return Err(anyhow!("PLAN_INVALID: no agents declared"));
    }

    let agents: Vec<Agent> = spec
        .agents
        .iter()
        .map(|a| Agent::new(a.name.clone(), a.role, a.persona.clone()))
        .collect();

    let builder = agents
        .iter()
        .find(|a| a.role == AgentRole::Builder)
        .or_else(|| agents.iter().find(|a| a.role == AgentRole::Custom))
        .or(agents.first())
        .ok_or_else(|| anyhow!("PLAN_INVALID: no agent can build"))?;

    let mut tasks = Vec::new();

    if spec.requirements.is_empty() {
        let mut task = Task::new("task-1", format!("Build {}", spec.goal), &builder.name);
        task.description = format!("Implement the project goal: {}", spec.goal);
        task.acceptance_criteria = vec![format!("{} works as described", spec.goal)];
        tasks.push(task);
    } else {
        for (index, requirement) in spec.requirements.iter().enumerate() {
            let id = format!("task-{}", index + 1);
            let mut task = Task::new(&id, requirement.description.clone(), &builder.name);
            task.description = format!(
                "Implement this {} requirement: {}",
                requirement.kind, requirement.description
            );
            task.acceptance_criteria = vec![format!("{} is implemented", requirement.description)];
            if index > 0 {
                task.dependencies = vec![format!("task-{}", index)];
            }
            tasks.push(task);
        }
    }

    let build_task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
    let mut last_id = build_task_ids
        .last()
        .cloned()
        .expect("at least one build task");

    let wants_testing =
        spec.workflow.testing_enabled || !spec.workflow.behavioral_tests.is_empty();
    if wants_testing {
        if let Some(tester) = agents.iter().find(|a| a.role == AgentRole::Tester) {
            let id = format!("task-{}", tasks.len() + 1);
            let mut task = Task::new(&id, format!("Test {}", spec.goal), &tester.name);
            task.description =
                "Write and run tests covering the implemented requirements.".to_string();
            task.acceptance_criteria = vec!["all tests pass".to_string()];
            task.dependencies = build_task_ids.clone();
            last_id = id;
            tasks.push(task);
        }
    }

    if spec.workflow.review_enabled {
        if let Some(reviewer) = agents.iter().find(|a| a.role == AgentRole::Reviewer) {
            let id = format!("task-{}", tasks.len() + 1);
            let mut task = Task::new(&id, format!("Review {}", spec.goal), &reviewer.name);
            task.description =
                "Review the generated code for defects, clarity and consistency.".to_string();
            task.acceptance_criteria = vec!["review findings are addressed or noted".to_string()];
            task.dependencies = vec![last_id.clone()];
            tasks.push(task);
        }
    }

    // Every assignment must resolve to a declared agent.
    for task in &tasks {
        if !agents.iter().any(|a| a.name == task.agent_name) {
            return Err(anyhow!(
                "PLAN_INVALID: task {} assigned to unknown agent {}",
                task.id,
                task.agent_name
            ));
        }
    }

    let graph =
        TaskGraph::build(&tasks).map_err(|e| anyhow!("PLAN_INVALID: {}", e))?;

    let mut explanation = format!(
        "Planned {} task(s) across {} agent(s) for \"{}\".",
        tasks.len(),
        agents.len(),
        spec.goal
    );
    if !memory_context.is_empty() {
        explanation.push_str(&format!(
            " Informed by {} similar prior run(s)",
            memory_context.len()
        ));
        let successes: Vec<&str> = memory_context
            .iter()
            .filter(|c| c.success)
            .map(|c| c.goal.as_str())
            .collect();
        if !successes.is_empty() {
            explanation.push_str(&format!(", including: {}", successes.join("; ")));
        }
        explanation.push('.');
    }

    Ok(Plan {
        tasks,
        agents,
        graph,
        explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_spec(workflow: serde_json::Value) -> ProjectSpec {
        ProjectSpec::from_value(&json!({
            "project": {"goal": "Counter", "type": "app"},
            "requirements": [
                {"type": "feature", "description": "increment count"},
                {"type": "feature", "description": "reset count"}
            ],
            "agents": [
                {"name": "Builder Bot", "role": "builder", "persona": "friendly"},
                {"name": "Test Bot", "role": "tester", "persona": ""},
                {"name": "Review Bot", "role": "reviewer", "persona": ""}
            ],
            "workflow": workflow
        }))
    }

    #[test]
    fn chains_build_tasks_and_appends_phases() {
        let spec = base_spec(json!({"testing_enabled": true, "review_enabled": true}));
        let plan = plan(&spec, &[]).unwrap();

        assert_eq!(plan.tasks.len(), 4);
        assert!(plan.tasks[1].dependencies.contains(&"task-1".to_string()));
        // Tester depends on all build tasks.
        let tester = &plan.tasks[2];
        assert_eq!(tester.agent_name, "Test Bot");
        assert_eq!(tester.dependencies, vec!["task-1", "task-2"]);
        // Reviewer depends on the tester.
        let reviewer = &plan.tasks[3];
        assert_eq!(reviewer.agent_name, "Review Bot");
        assert_eq!(reviewer.dependencies, vec!["task-3"]);
    }

    #[test]
    fn testing_disabled_yields_build_tasks_only() {
        let spec = base_spec(json!({"testing_enabled": false, "review_enabled": false}));
        let plan = plan(&spec, &[]).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.tasks.iter().all(|t| t.agent_name == "Builder Bot"));
    }

    #[test]
    fn behavioral_tests_force_a_tester_task() {
        let spec = base_spec(json!({
            "testing_enabled": false,
            "behavioral_tests": [{"when": "clicked", "then": "count rises"}]
        }));
        let plan = plan(&spec, &[]).unwrap();
        assert!(plan.tasks.iter().any(|t| t.agent_name == "Test Bot"));
    }

    #[test]
    fn no_requirements_becomes_a_single_goal_task() {
        let spec = ProjectSpec::from_value(&json!({
            "project": {"goal": "Robot pet"},
            "agents": [{"name": "B", "role": "builder"}]
        }));
        let plan = plan(&spec, &[]).unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert!(plan.tasks[0].name.contains("Robot pet"));
    }

    #[test]
    fn missing_agents_is_plan_invalid() {
        let spec = ProjectSpec::from_value(&json!({"project": {"goal": "X"}}));
        let err = plan(&spec, &[]).unwrap_err();
        assert!(err.to_string().contains("PLAN_INVALID"));
    }

    #[test]
    fn memory_context_shapes_the_explanation() {
        let spec = base_spec(json!({}));
        let context = vec![PlannerContextEntry {
            goal: "another counter".into(),
            similarity: 0.8,
            success: true,
            judge_score: 90,
            helpful_patterns: vec![],
            pitfalls: vec![],
        }];
        let plan = plan(&spec, &context).unwrap();
        assert!(plan.explanation.contains("similar prior run"));
        assert!(plan.explanation.contains("another counter"));
    }
}
