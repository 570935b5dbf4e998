//! LLM provider capability
//!
//! Providers are opaque to the engine: a model hint and a prompt go in, a
//! completion string comes out. Real provider clients live outside this
//! crate; here we ship the trait, a factory, an `echo` stand-in for dry
//! runs, and a scripted double for tests.

mod client;

pub use client::{EchoClient, LlmClient, ScriptedClient};

use std::sync::Arc;

use thiserror::Error;

/// Errors from LLM providers
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider '{0}' is not available in this build")]
    UnknownProvider(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("no more scripted responses")]
    Exhausted,
}

/// Create a provider client by name.
///
/// Only the `echo` stand-in is built in; anything else is expected to be
/// wired up by the embedding application.
pub fn create_client(provider: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
    match provider {
        "echo" => Ok(Arc::new(EchoClient)),
        other => Err(LlmError::UnknownProvider(other.to_string())),
    }
}
