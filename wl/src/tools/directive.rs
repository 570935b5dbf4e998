//! Tool directive parsing
//!
//! A step's `input` or `output` string may embed a tool invocation. The
//! parsers here recognize the directive forms and reject empty commands;
//! anything that is not a directive is returned as `None` for the caller
//! to treat as a plain value.

use tracing::debug;

use super::ToolError;

/// A parsed tool invocation from a step's input or output string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDirective {
    /// Shell command to run
    pub command: String,
    /// Whether the command reads the prior output on stdin (`STDIN|`) or
    /// receives the step output on stdin (`STDOUT|`)
    pub uses_pipe: bool,
}

/// Parse a step `input` value as a tool directive.
///
/// `tool: <cmd>` runs `<cmd>` and uses its stdout as the step input;
/// `STDIN|<cmd>` runs `<cmd>` with the prior step's output on its stdin.
pub fn parse_tool_input(input: &str) -> Result<Option<ToolDirective>, ToolError> {
    let trimmed = input.trim();

    if let Some(rest) = trimmed.strip_prefix("tool:") {
        let command = rest.trim();
        debug!(%command, "parse_tool_input: tool directive");
        if command.is_empty() {
            return Err(ToolError::EmptyCommand);
        }
        return Ok(Some(ToolDirective {
            command: command.to_string(),
            uses_pipe: false,
        }));
    }

    if let Some(rest) = trimmed.strip_prefix("STDIN|") {
        let command = rest.trim();
        debug!(%command, "parse_tool_input: STDIN pipe directive");
        if command.is_empty() {
            return Err(ToolError::EmptyCommand);
        }
        return Ok(Some(ToolDirective {
            command: command.to_string(),
            uses_pipe: true,
        }));
    }

    Ok(None)
}

/// Parse a step `output` value as a tool directive.
///
/// `STDOUT|<cmd>` pipes the step's LLM output into `<cmd>`, whose stdout
/// becomes the step's output; `tool: <cmd>` runs `<cmd>` after the step.
pub fn parse_tool_output(output: &str) -> Result<Option<ToolDirective>, ToolError> {
    let trimmed = output.trim();

    if let Some(rest) = trimmed.strip_prefix("STDOUT|") {
        let command = rest.trim();
        debug!(%command, "parse_tool_output: STDOUT pipe directive");
        if command.is_empty() {
            return Err(ToolError::EmptyCommand);
        }
        return Ok(Some(ToolDirective {
            command: command.to_string(),
            uses_pipe: true,
        }));
    }

    if let Some(rest) = trimmed.strip_prefix("tool:") {
        let command = rest.trim();
        debug!(%command, "parse_tool_output: tool directive");
        if command.is_empty() {
            return Err(ToolError::EmptyCommand);
        }
        return Ok(Some(ToolDirective {
            command: command.to_string(),
            uses_pipe: false,
        }));
    }

    Ok(None)
}
