//! Durable loop state
//!
//! Stateful loops checkpoint their context to per-loop JSON files so an
//! interrupted run can resume where it left off. A hash of the workflow
//! file guards resumption against stale state.

mod store;

pub use store::{
    LoopStateStore, PersistedLoopState, StateError, validate_workflow_checksum, workflow_checksum,
};
