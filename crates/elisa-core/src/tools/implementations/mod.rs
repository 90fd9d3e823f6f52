//! Built-in tool implementations.

mod ask_user;
mod bash;
mod edit;
mod file_glob;
mod grep;
mod ls;
mod multiedit;
mod notebook;
mod read;
mod write;

use std::sync::Arc;

use super::registry::ToolRegistry;

pub use ask_user::{AskUserTool, ASK_USER_TOOL};

/// Register the fixed tool allowlist.
pub fn register_all_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(read::ReadTool));
    registry.register(Arc::new(write::WriteTool));
    registry.register(Arc::new(edit::EditTool));
    registry.register(Arc::new(multiedit::MultiEditTool));
    registry.register(Arc::new(file_glob::GlobTool));
    registry.register(Arc::new(grep::GrepTool));
    registry.register(Arc::new(ls::LsTool));
    registry.register(Arc::new(bash::BashTool));
    registry.register(Arc::new(notebook::NotebookReadTool));
    registry.register(Arc::new(notebook::NotebookEditTool));
    registry.register(Arc::new(ask_user::AskUserTool));
}

/// The default allowlist handed to a dispatch when the caller does not
/// narrow it.
pub fn default_allowed_tools() -> Vec<String> {
    [
        "Read",
        "Write",
        "Edit",
        "MultiEdit",
        "Glob",
        "Grep",
        "LS",
        "Bash",
        "NotebookRead",
        "NotebookEdit",
        ASK_USER_TOOL,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
