//! Dependency graph over tasks: acyclic validation, topological readiness,
//! and descendant resolution for failure cascades.
//!
//! The graph itself is immutable after planning; task statuses live in the
//! executor's state map and are passed in for each readiness query.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{bail, Result};

use crate::task::{Task, TaskStatus};

/// Immutable task dependency graph, insertion-ordered.
#[derive(Debug)]
pub struct TaskGraph {
    /// Task ids in insertion order (the scheduling tie-break).
    order: Vec<String>,
    deps: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Build and validate a graph. Fails when an edge references an unknown
    /// task or the graph has a cycle.
    pub fn build(tasks: &[Task]) -> Result<Self> {
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        if ids.len() != tasks.len() {
            bail!("duplicate task ids in plan");
        }

        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for task in tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    bail!("task {} depends on unknown task {}", task.id, dep);
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(task.id.clone());
            }
            deps.insert(task.id.clone(), task.dependencies.clone());
        }

        let graph = Self {
            order: tasks.iter().map(|t| t.id.clone()).collect(),
            deps,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn's algorithm; any unprocessed remainder is a cycle.
    fn check_acyclic(&self) -> Result<()> {
        let mut indegree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.deps[id].len()))
            .collect();

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut processed = 0usize;
        while let Some(id) = queue.pop_front() {
            processed += 1;
            for dependent in self.dependents_of(id) {
                let d = indegree.get_mut(dependent.as_str()).expect("known task");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if processed != self.order.len() {
            bail!("task graph contains a cycle");
        }
        Ok(())
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.deps.get(id).map_or(&[], |d| d.as_slice())
    }

    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map_or(&[], |d| d.as_slice())
    }

    /// Tasks whose predecessors are all `done` and which are still pending,
    /// in insertion order, capped at `limit`.
    pub fn ready_batch(
        &self,
        statuses: &HashMap<String, TaskStatus>,
        limit: usize,
    ) -> Vec<String> {
        let mut batch = Vec::new();
        for id in &self.order {
            if batch.len() >= limit {
                break;
            }
            if statuses.get(id).copied() != Some(TaskStatus::Pending) {
                continue;
            }
            let ready = self
                .dependencies_of(id)
                .iter()
                .all(|dep| statuses.get(dep).copied() == Some(TaskStatus::Done));
            if ready {
                batch.push(id.clone());
            }
        }
        batch
    }

    /// All direct and transitive descendants of `id`, in insertion order.
    pub fn descendants_of(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .dependents_of(id)
            .iter()
            .map(String::as_str)
            .collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents_of(next).iter().map(String::as_str));
            }
        }

        self.order
            .iter()
            .filter(|tid| seen.contains(tid.as_str()))
            .cloned()
            .collect()
    }

    /// True when every task has reached a terminal status.
    pub fn all_terminal(&self, statuses: &HashMap<String, TaskStatus>) -> bool {
        self.order
            .iter()
            .all(|id| statuses.get(id).is_some_and(|s| s.is_terminal()))
    }
}
