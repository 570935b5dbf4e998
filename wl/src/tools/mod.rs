//! External tool execution
//!
//! Steps can shell out through three directive forms: `tool: <cmd>` as an
//! input source, `STDIN|<cmd>` to pipe the prior step's output into a
//! command, and `STDOUT|<cmd>` to pipe a step's output through a command.
//! Every command passes the allow/deny policy before it runs.

mod directive;
mod executor;
mod policy;

pub use directive::{ToolDirective, parse_tool_input, parse_tool_output};
pub use executor::{DEFAULT_TOOL_TIMEOUT_SECS, ToolExecutor, ToolOutput};
pub use policy::{DEFAULT_ALLOW, DEFAULT_DENY, ToolPolicy};

use thiserror::Error;

/// Errors from tool directive parsing, policy checks, and execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("empty tool command")]
    EmptyCommand,

    #[error("command '{command}' is blocked: '{name}' is on the denylist")]
    Denied { command: String, name: String },

    #[error("command '{command}' is blocked: '{name}' is not in the allowlist")]
    NotAllowed { command: String, name: String },

    #[error("command '{command}' is blocked: '{name}' is not in the allowlist for this loop")]
    NotInLoopWhitelist { command: String, name: String },

    #[error("tool command timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("failed to execute tool command: {0}")]
    Io(#[from] std::io::Error),
}
