//! Engine error taxonomy
//!
//! Typed errors for every failure class the engine can produce. Pre-flight
//! errors (validation, config, policy, dependency) abort before any work
//! begins; step and gate errors are fatal to their loop; timeouts leave the
//! workflow resumable.

use thiserror::Error;

use crate::state::StateError;
use crate::workflow::ValidationIssue;

/// Errors produced while running a workflow
#[derive(Debug, Error)]
pub enum EngineError {
    /// Static validation found problems before execution started
    #[error("workflow validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    /// The workflow or engine configuration is unusable
    #[error("config error: {0}")]
    Config(String),

    /// Tool policy or the global agentic-tools switch refused an operation
    #[error("policy violation: {0}")]
    Policy(String),

    /// Unknown or cyclic loop dependencies
    #[error("dependency error: {0}")]
    Dependency(String),

    /// A step failed inside a loop iteration; the message carries the step name
    #[error("loop '{loop_name}' iteration {iteration}: {message}")]
    Step {
        loop_name: String,
        iteration: u32,
        message: String,
    },

    /// An abort-level quality gate failure after exhausting its retry budget
    #[error("loop '{loop_name}' iteration {iteration}: quality gate '{gate}' failed after {attempts} attempt(s): {message}")]
    Gate {
        loop_name: String,
        iteration: u32,
        gate: String,
        attempts: u32,
        message: String,
    },

    /// The loop's deadline passed; state was persisted as paused and the
    /// loop can be resumed on the next invocation
    #[error("loop '{loop_name}' timed out after iteration {iteration}; state saved as paused")]
    Timeout { loop_name: String, iteration: u32 },

    /// Checkpoint store failure
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider failure, bubbled up unchanged
    #[error("provider error: {0}")]
    Provider(String),
}

impl EngineError {
    /// True for errors that leave a resumable checkpoint behind.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_carries_loop_and_iteration() {
        let err = EngineError::Step {
            loop_name: "refactor".to_string(),
            iteration: 3,
            message: "step 'apply': input file not found: missing.txt".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("refactor"));
        assert!(msg.contains("iteration 3"));
        assert!(msg.contains("apply"));
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let err = EngineError::Timeout {
            loop_name: "slow".to_string(),
            iteration: 1,
        };
        assert!(err.is_recoverable());

        let err = EngineError::Config("bad".to_string());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_gate_error_message() {
        let err = EngineError::Gate {
            loop_name: "build".to_string(),
            iteration: 2,
            gate: "tests".to_string(),
            attempts: 3,
            message: "command exited with code 1".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("'tests'"));
        assert!(msg.contains("3 attempt(s)"));
        assert!(msg.contains("'build'"));
    }
}
