//! Workloop - declarative agentic workflow engine
//!
//! A workflow file declares LLM-driven work units ("loops") that iterate
//! against a working directory, gated by programmable verification checks
//! ("quality gates"), with checkpointing, resumption, and inter-loop
//! dependency resolution.
//!
//! # Core concepts
//!
//! - **Loops iterate, gates verify**: each iteration threads the loop's
//!   steps through a provider or tool, then the quality gates run against
//!   the working directory
//! - **State in files**: stateful loops checkpoint their context to JSON
//!   and resume across invocations; a workflow hash guards staleness
//! - **Dependencies schedule**: loops declare `depends_on`; the
//!   orchestrator runs them sequentially in topological order and pipes
//!   results through a shared variable map
//!
//! # Modules
//!
//! - [`workflow`] - declarative data model, loader, and validator
//! - [`tools`] - allow/deny-listed shell command execution
//! - [`gates`] - quality gate variants and the retry runner
//! - [`state`] - durable per-loop checkpoints
//! - [`step`] - single-step execution against a provider or tool
//! - [`r#loop`] - the loop iteration engine
//! - [`orchestrator`] - multi-loop dependency scheduling
//! - [`llm`] - the opaque provider capability

pub mod cli;
pub mod config;
pub mod error;
pub mod gates;
pub mod llm;
pub mod orchestrator;
pub mod state;
pub mod step;
pub mod tools;
pub mod vars;
pub mod workflow;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

// Re-export commonly used types
pub use config::{ALLOW_AGENTIC_TOOLS_ENV, Config, agentic_tools_allowed};
pub use error::EngineError;
pub use gates::{Gate, GateRunner, QualityGateResult, backoff_delay};
pub use llm::{EchoClient, LlmClient, LlmError, ScriptedClient, create_client};
pub use orchestrator::{DependencyGraph, LoopRun, Orchestrator, WorkflowOutcome};
pub use r#loop::{LoopContext, LoopEngine, LoopIteration, LoopOutcome, LoopStatus, evaluate_exit};
pub use state::{LoopStateStore, PersistedLoopState, StateError, validate_workflow_checksum, workflow_checksum};
pub use step::{StepError, StepExecutor};
pub use tools::{ToolDirective, ToolError, ToolExecutor, ToolPolicy, parse_tool_input, parse_tool_output};
pub use vars::{VariableMap, is_variable_name, render_template};
pub use workflow::{
    LoopConfig, QualityGateConfig, Step, StepInput, ValidationIssue, ValidationResult, Workflow, validate_workflow,
};
