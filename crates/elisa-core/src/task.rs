//! Tasks and runtime agents: the nodes the scheduler drives.

use serde::{Deserialize, Serialize};

use crate::spec::AgentRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A node in the dependency graph assigned to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub agent_name: String,
    pub dependencies: Vec<String>,
    pub acceptance_criteria: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            agent_name: agent_name.into(),
            dependencies: Vec::new(),
            acceptance_criteria: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Working,
    Done,
    Error,
}

/// A role-typed persona whose prompts are dispatched to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub role: AgentRole,
    pub persona: String,
    pub status: AgentState,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: AgentRole, persona: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            persona: persona.into(),
            status: AgentState::Idle,
        }
    }
}
