//! LlmClient trait and built-in implementations

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::LlmError;

/// Stateless LLM client - each call is independent.
///
/// The engine never holds conversation state; every prompt carries the
/// full context it needs (the loop engine assembles iteration history
/// into the prompt text itself).
#[async_trait]
pub trait LlmClient: Send + Sync + std::fmt::Debug {
    /// Send a prompt to the given model and return the completion text.
    async fn prompt(&self, model: &str, input: &str) -> Result<String, LlmError>;
}

/// Stand-in provider that returns the prompt unchanged.
///
/// Useful for dry-running a workflow's plumbing (input resolution, tool
/// directives, output placement) without network access.
#[derive(Debug)]
pub struct EchoClient;

#[async_trait]
impl LlmClient for EchoClient {
    async fn prompt(&self, model: &str, input: &str) -> Result<String, LlmError> {
        debug!(%model, input_len = input.len(), "EchoClient::prompt");
        Ok(input.to_string())
    }
}

/// Scripted client that replays a fixed sequence of responses.
///
/// Once the script is exhausted the final response repeats, so a loop
/// driven to `max_iterations` does not need an exact response count. An
/// optional per-call delay simulates a slow provider for timeout tests.
#[derive(Debug)]
pub struct ScriptedClient {
    responses: Vec<String>,
    call_count: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            call_count: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep this long before answering each prompt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn prompt(&self, model: &str, _input: &str) -> Result<String, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        debug!(%model, idx, "ScriptedClient::prompt");

        match self.responses.get(idx).or_else(|| self.responses.last()) {
            Some(response) => Ok(response.clone()),
            None => Err(LlmError::Exhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_input() {
        let client = EchoClient;
        let out = client.prompt("default", "hello").await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_scripted_replays_in_order() {
        let client = ScriptedClient::new(vec!["one", "two"]);

        assert_eq!(client.prompt("m", "x").await.unwrap(), "one");
        assert_eq!(client.prompt("m", "x").await.unwrap(), "two");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_repeats_final_response() {
        let client = ScriptedClient::new(vec!["only"]);

        assert_eq!(client.prompt("m", "x").await.unwrap(), "only");
        assert_eq!(client.prompt("m", "x").await.unwrap(), "only");
        assert_eq!(client.prompt("m", "x").await.unwrap(), "only");
    }

    #[tokio::test]
    async fn test_scripted_empty_errors() {
        let client = ScriptedClient::new(Vec::<String>::new());
        assert!(client.prompt("m", "x").await.is_err());
    }
}
