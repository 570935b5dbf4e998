//! Quality gates
//!
//! Programmable verification checks that run after every loop iteration.
//! Four variants share a single `check` operation: a plain command gate, a
//! per-language syntax gate, a pattern-scanning security gate, and a test
//! gate that extracts a runner summary. The runner applies each gate's
//! retry budget and on-fail policy.

mod builtin;
mod runner;

pub use builtin::{Gate, GateCheck};
pub use runner::{GateRunner, backoff_delay};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Abort-level failure from the gate runner, raised once a gate's retry
/// budget is exhausted under the `abort` policy
#[derive(Debug, Error)]
#[error("quality gate '{gate}' failed after {attempts} attempt(s): {message}")]
pub struct GateFailure {
    pub gate: String,
    pub attempts: u32,
    pub message: String,
}

/// Recorded outcome of one gate, after retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub gate_name: String,
    pub passed: bool,
    /// Attempts actually made; equals the configured maximum when every
    /// attempt failed
    pub attempts: u32,
    pub duration_ms: u64,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}
