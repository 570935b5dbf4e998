//! Tool allow/deny policy
//!
//! A command may run when its base name is allow-listed and not
//! deny-listed; the denylist wins on conflict. A per-loop whitelist, when
//! present, further restricts the allowlist. Pipelines and command lists
//! are checked segment by segment.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use super::ToolError;

/// Commands permitted by default
pub const DEFAULT_ALLOW: &[&str] = &[
    "ls", "cat", "grep", "jq", "echo", "date", "head", "tail", "wc", "sort", "uniq", "awk", "sed", "find", "tr",
    "cut", "diff", "bd",
];

/// Commands refused regardless of the allowlist
pub const DEFAULT_DENY: &[&str] = &[
    "rm", "sudo", "su", "bash", "sh", "zsh", "chmod", "chown", "curl", "wget", "nc", "ssh", "scp", "mv", "dd",
    "mkfs", "kill", "killall", "eval", "exec",
];

/// Allow/deny policy for tool commands, with an optional per-loop whitelist
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    allow: HashSet<String>,
    deny: HashSet<String>,
    whitelist: Option<HashSet<String>>,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALLOW.iter().map(|s| s.to_string()),
            DEFAULT_DENY.iter().map(|s| s.to_string()),
        )
    }
}

impl ToolPolicy {
    pub fn new(allow: impl IntoIterator<Item = String>, deny: impl IntoIterator<Item = String>) -> Self {
        Self {
            allow: allow.into_iter().collect(),
            deny: deny.into_iter().collect(),
            whitelist: None,
        }
    }

    /// Overlay a loop's `tools` whitelist. An empty list means no overlay.
    pub fn with_whitelist(mut self, tools: &[String]) -> Self {
        if !tools.is_empty() {
            self.whitelist = Some(tools.iter().cloned().collect());
        }
        self
    }

    /// Check a full command line against the policy.
    ///
    /// Each pipeline/list segment's first token is resolved to its base
    /// name (leading path stripped) and checked. The denylist is consulted
    /// first so a name on both lists stays blocked.
    pub fn check(&self, command: &str) -> Result<(), ToolError> {
        let mut checked_any = false;

        for segment in split_segments(command) {
            let Some(token) = segment.split_whitespace().next() else {
                continue;
            };
            checked_any = true;
            let name = base_name(token);
            debug!(%name, %segment, "ToolPolicy::check: segment");

            if self.deny.contains(&name) {
                return Err(ToolError::Denied {
                    command: command.to_string(),
                    name,
                });
            }
            if !self.allow.contains(&name) {
                return Err(ToolError::NotAllowed {
                    command: command.to_string(),
                    name,
                });
            }
            if let Some(whitelist) = &self.whitelist
                && !whitelist.contains(&name)
            {
                return Err(ToolError::NotInLoopWhitelist {
                    command: command.to_string(),
                    name,
                });
            }
        }

        if !checked_any {
            return Err(ToolError::EmptyCommand);
        }
        Ok(())
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.check(command).is_ok()
    }
}

/// Split a command line into pipeline/list segments (`|`, `;`, `&`).
fn split_segments(command: &str) -> impl Iterator<Item = &str> {
    command
        .split(['|', ';', '&'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Base name of a command token with any leading path stripped.
fn base_name(token: &str) -> String {
    Path::new(token)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(token)
        .to_string()
}
