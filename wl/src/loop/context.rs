//! Per-loop runtime state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Status of a loop execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Running,
    Paused,
    Failed,
    Completed,
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopStatus::Running => "running",
            LoopStatus::Paused => "paused",
            LoopStatus::Failed => "failed",
            LoopStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// One completed pass through a loop's steps, immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopIteration {
    /// 1-based iteration index
    pub index: u32,
    /// Final step output of the iteration
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

/// Runtime state of a loop, owned exclusively by the engine running it.
///
/// Invariant: `iteration == history.len()` after any checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopContext {
    /// Count of completed iterations (1-based once the first completes)
    pub iteration: u32,
    /// Output of the most recent iteration, or the initial input
    pub previous_output: String,
    /// Append-only record of completed iterations
    pub history: Vec<LoopIteration>,
    pub start_time: DateTime<Utc>,
}

impl LoopContext {
    /// Fresh context for a loop starting from scratch.
    pub fn fresh(initial_input: &str) -> Self {
        Self {
            iteration: 0,
            previous_output: initial_input.to_string(),
            history: Vec::new(),
            start_time: Utc::now(),
        }
    }

    /// Advance the iteration counter at the top of the iteration body.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration += 1;
        debug!(iteration = self.iteration, "LoopContext::begin_iteration");
        self.iteration
    }

    /// Record the iteration's final output, restoring the invariant
    /// `iteration == history.len()`.
    pub fn complete_iteration(&mut self, output: String) {
        self.history.push(LoopIteration {
            index: self.iteration,
            output: output.clone(),
            timestamp: Utc::now(),
        });
        self.previous_output = output;
        debug!(iteration = self.iteration, history_len = self.history.len(), "LoopContext::complete_iteration");
    }

    /// Seconds elapsed since the loop first started.
    pub fn elapsed_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
