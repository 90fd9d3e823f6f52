//! Inbound project specification.
//!
//! The spec arrives as an open JSON document produced by an external editor.
//! Every field goes through a typed accessor, unknown fields are ignored,
//! and construction never fails: a missing or malformed field degrades to
//! its default.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Builder,
    Tester,
    Reviewer,
    Custom,
}

impl AgentRole {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "builder" => Self::Builder,
            "tester" => Self::Tester,
            "reviewer" => Self::Reviewer,
            _ => Self::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployTarget {
    Preview,
    Web,
    Esp32,
    Both,
}

impl DeployTarget {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "web" => Self::Web,
            "esp32" => Self::Esp32,
            "both" => Self::Both,
            _ => Self::Preview,
        }
    }
}

/// A declared agent persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role: AgentRole,
    pub persona: String,
}

/// One requirement line from the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// A `{when, then}` pair the tester agent must verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralTest {
    pub when: String,
    pub then: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub testing_enabled: bool,
    pub review_enabled: bool,
    pub human_gates: bool,
    pub behavioral_tests: Vec<BehavioralTest>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            testing_enabled: true,
            review_enabled: false,
            human_gates: false,
            behavioral_tests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub target: DeployTarget,
    pub auto_flash: bool,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            target: DeployTarget::Preview,
            auto_flash: false,
        }
    }
}

/// An external-world capability wired into the agent's tool surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSpec {
    pub name: String,
    /// Transport kind: "serial", "mcp" or "cli".
    pub kind: String,
    pub config: Value,
}

/// Reusable skill or rule carried in the spec and the build memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSpec {
    pub name: String,
    pub prompt: String,
}

/// The parsed, read-only project specification.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSpec {
    pub goal: String,
    pub project_type: String,
    pub requirements: Vec<Requirement>,
    pub agents: Vec<AgentSpec>,
    pub portals: Vec<PortalSpec>,
    pub deployment: Deployment,
    pub workflow: Workflow,
    pub skills: Vec<PatternSpec>,
    pub rules: Vec<PatternSpec>,
}

impl ProjectSpec {
    /// Parse an open spec document. Never fails; absent fields default.
    pub fn from_value(doc: &Value) -> Self {
        let project = doc.get("project").unwrap_or(doc);

        let goal = str_field(project, "goal");
        let project_type = {
            let t = str_field(project, "type");
            if t.is_empty() {
                "app".to_string()
            } else {
                t
            }
        };

        let requirements = arr_field(doc, "requirements")
            .iter()
            .filter_map(|r| {
                let description = str_field(r, "description");
                if description.is_empty() {
                    return None;
                }
                Some(Requirement {
                    kind: {
                        let k = str_field(r, "type");
                        if k.is_empty() {
                            "feature".to_string()
                        } else {
                            k
                        }
                    },
                    description,
                })
            })
            .collect();

        let agents = arr_field(doc, "agents")
            .iter()
            .filter_map(|a| {
                let name = str_field(a, "name");
                if name.is_empty() {
                    return None;
                }
                Some(AgentSpec {
                    name,
                    role: AgentRole::parse(&str_field(a, "role")),
                    persona: str_field(a, "persona"),
                })
            })
            .collect();

        let portals = arr_field(doc, "portals")
            .iter()
            .filter_map(|p| {
                let name = str_field(p, "name");
                if name.is_empty() {
                    return None;
                }
                Some(PortalSpec {
                    name,
                    kind: {
                        let k = str_field(p, "kind");
                        if k.is_empty() {
                            str_field(p, "type")
                        } else {
                            k
                        }
                    },
                    config: p.get("config").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        let deployment = doc
            .get("deployment")
            .map(|d| Deployment {
                target: DeployTarget::parse(&str_field(d, "target")),
                auto_flash: bool_field(d, "auto_flash", false),
            })
            .unwrap_or_default();

        let workflow = doc
            .get("workflow")
            .map(|w| Workflow {
                testing_enabled: bool_field(w, "testing_enabled", true),
                review_enabled: bool_field(w, "review_enabled", false),
                human_gates: bool_field(w, "human_gates", false),
                behavioral_tests: arr_field(w, "behavioral_tests")
                    .iter()
                    .filter_map(|t| {
                        let when = str_field(t, "when");
                        let then = str_field(t, "then");
                        if when.is_empty() && then.is_empty() {
                            None
                        } else {
                            Some(BehavioralTest { when, then })
                        }
                    })
                    .collect(),
            })
            .unwrap_or_default();

        Self {
            goal,
            project_type,
            requirements,
            agents,
            portals,
            deployment,
            workflow,
            skills: patterns_field(doc, "skills"),
            rules: patterns_field(doc, "rules"),
        }
    }

    /// A spec is viable when it names a goal.
    pub fn is_viable(&self) -> bool {
        !self.goal.trim().is_empty()
    }

    /// Portals whose transport needs an MCP connection.
    pub fn has_mcp_portals(&self) -> bool {
        self.portals.iter().any(|p| p.kind == "mcp")
    }

    pub fn has_serial_portals(&self) -> bool {
        self.portals.iter().any(|p| p.kind == "serial")
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn bool_field(v: &Value, key: &str, default: bool) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn arr_field<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map_or(&[] as &[Value], |a| a.as_slice())
}

fn patterns_field(doc: &Value, key: &str) -> Vec<PatternSpec> {
    arr_field(doc, key)
        .iter()
        .filter_map(|p| {
            let name = str_field(p, "name");
            if name.is_empty() {
                return None;
            }
            Some(PatternSpec {
                name,
                prompt: str_field(p, "prompt"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_spec() {
        let doc = json!({
            "project": {"goal": "Counter", "type": "web"},
            "requirements": [
                {"type": "feature", "description": "increment count"},
                {"description": "show total"}
            ],
            "agents": [{"name": "Builder Bot", "role": "builder", "persona": "friendly"}],
            "deployment": {"target": "esp32", "auto_flash": true},
            "workflow": {
                "testing_enabled": false,
                "behavioral_tests": [{"when": "clicked", "then": "count rises"}]
            }
        });

        let spec = ProjectSpec::from_value(&doc);
        assert_eq!(spec.goal, "Counter");
        assert_eq!(spec.requirements.len(), 2);
        assert_eq!(spec.requirements[1].kind, "feature");
        assert_eq!(spec.agents[0].role, AgentRole::Builder);
        assert_eq!(spec.deployment.target, DeployTarget::Esp32);
        assert!(spec.deployment.auto_flash);
        assert!(!spec.workflow.testing_enabled);
        assert_eq!(spec.workflow.behavioral_tests.len(), 1);
        assert!(spec.is_viable());
    }

    #[test]
    fn unknown_fields_and_junk_are_tolerated() {
        let doc = json!({
            "project": {"goal": "Robot", "mystery": [1, 2, 3]},
            "agents": [{"role": "builder"}, {"name": "A", "role": "overlord"}],
            "deployment": {"target": 42},
            "workflow": "not an object"
        });

        let spec = ProjectSpec::from_value(&doc);
        assert_eq!(spec.goal, "Robot");
        // Nameless agent dropped, unknown role coerced to custom.
        assert_eq!(spec.agents.len(), 1);
        assert_eq!(spec.agents[0].role, AgentRole::Custom);
        assert_eq!(spec.deployment.target, DeployTarget::Preview);
        assert!(spec.workflow.testing_enabled);
    }

    #[test]
    fn empty_goal_is_not_viable() {
        let spec = ProjectSpec::from_value(&json!({"project": {"goal": "  "}}));
        assert!(!spec.is_viable());
    }
}
