//! Tool sandbox: the fixed allowlist of file/search/shell tools agents may
//! call, executed under the workspace jail.

pub mod implementations;
pub mod registry;

pub use implementations::register_all_tools;
pub use registry::{parse_params, Tool, ToolContext, ToolRegistry, ToolResult};
