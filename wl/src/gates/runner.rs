//! Gate execution with retry and on-fail policy

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::workflow::{BackoffType, OnFail, QualityGateConfig, RetryConfig};

use super::{Gate, GateFailure, QualityGateResult};

/// Runs a loop's quality gates in declared order
pub struct GateRunner {
    work_dir: PathBuf,
}

impl GateRunner {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Run all gates in order.
    ///
    /// A failed gate consults its `on_fail` policy: `abort` (the default)
    /// short-circuits the remaining gates with a failure; `skip` continues;
    /// `retry` behaves like `skip` because the retry budget was already
    /// consumed per attempt.
    pub async fn run_gates(&self, configs: &[QualityGateConfig]) -> Result<Vec<QualityGateResult>, GateFailure> {
        let mut results = Vec::with_capacity(configs.len());

        for config in configs {
            let result = self.run_gate(config).await?;
            let passed = result.passed;
            let attempts = result.attempts;
            let message = result.message.clone();
            results.push(result);

            if !passed {
                match config.on_fail {
                    OnFail::Abort => {
                        return Err(GateFailure {
                            gate: config.name.clone(),
                            attempts,
                            message,
                        });
                    }
                    OnFail::Skip | OnFail::Retry => {
                        warn!(gate = %config.name, "gate failed; continuing per on_fail policy");
                    }
                }
            }
        }

        Ok(results)
    }

    /// Run one gate through its retry budget.
    async fn run_gate(&self, config: &QualityGateConfig) -> Result<QualityGateResult, GateFailure> {
        let gate = Gate::from_config(config)?;
        let timeout = Duration::from_secs(config.timeout.max(1));
        let max_attempts = config.retry.max_attempts.max(1);
        let start = Instant::now();

        let mut last_check = None;
        for attempt in 1..=max_attempts {
            debug!(gate = %config.name, attempt, max_attempts, "running gate attempt");
            let check = gate.check(&self.work_dir, timeout).await;

            if check.passed {
                info!(gate = %config.name, attempt, "gate passed");
                return Ok(QualityGateResult {
                    gate_name: config.name.clone(),
                    passed: true,
                    attempts: attempt,
                    duration_ms: start.elapsed().as_millis() as u64,
                    message: check.message,
                    details: check.details,
                });
            }

            debug!(gate = %config.name, attempt, message = %check.message, "gate attempt failed");
            last_check = Some(check);

            if attempt < max_attempts {
                let delay = backoff_delay(&config.retry, attempt);
                debug!(gate = %config.name, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        let last = last_check.unwrap_or_else(|| super::GateCheck {
            passed: false,
            message: "gate never ran".to_string(),
            details: Default::default(),
        });

        warn!(gate = %config.name, attempts = max_attempts, "gate failed after exhausting retries");
        Ok(QualityGateResult {
            gate_name: config.name.clone(),
            passed: false,
            attempts: max_attempts,
            duration_ms: start.elapsed().as_millis() as u64,
            message: last.message,
            details: last.details,
        })
    }
}

/// Delay to sleep after `attempt` failed attempts, before the next one.
///
/// Linear backoff sleeps `initial_delay * k`; exponential sleeps
/// `initial_delay * 2^(k-1)`.
pub fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let base = retry.initial_delay.max(0.0);
    let seconds = match retry.backoff_type {
        BackoffType::Linear => base * attempt as f64,
        BackoffType::Exponential => base * f64::from(2u32.saturating_pow(attempt.saturating_sub(1))),
    };
    Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::OnFail;
    use tempfile::tempdir;

    fn command_gate(name: &str, command: &str) -> QualityGateConfig {
        QualityGateConfig {
            name: name.to_string(),
            command: command.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_backoff_delays() {
        let retry = RetryConfig {
            max_attempts: 4,
            backoff_type: BackoffType::Linear,
            initial_delay: 2.0,
        };

        assert_eq!(backoff_delay(&retry, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&retry, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(&retry, 3), Duration::from_secs(6));
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let retry = RetryConfig {
            max_attempts: 4,
            backoff_type: BackoffType::Exponential,
            initial_delay: 1.0,
        };

        assert_eq!(backoff_delay(&retry, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&retry, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&retry, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(&retry, 4), Duration::from_secs(8));
    }

    #[test]
    fn test_total_backoff_before_attempt_k() {
        // Sum of sleeps before attempt k is the series over delay(i)
        let retry = RetryConfig {
            max_attempts: 3,
            backoff_type: BackoffType::Exponential,
            initial_delay: 1.0,
        };

        let total: Duration = (1..3).map(|i| backoff_delay(&retry, i)).sum();
        assert_eq!(total, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_gate_passes_first_attempt() {
        let temp = tempdir().unwrap();
        let runner = GateRunner::new(temp.path());

        let results = runner.run_gates(&[command_gate("ok", "true")]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
        assert_eq!(results[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_gate_retries_until_success() {
        let temp = tempdir().unwrap();
        let runner = GateRunner::new(temp.path());

        // Fails twice (marker file absent, then created on second run),
        // succeeds on the third attempt.
        let mut config = command_gate(
            "flaky",
            "test -f second || { test -f first && touch second; touch first; exit 1; }",
        );
        config.retry.max_attempts = 3;
        config.retry.initial_delay = 0.01;

        let results = runner.run_gates(&[config]).await.unwrap();
        assert!(results[0].passed);
        assert_eq!(results[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_abort_gate_short_circuits() {
        let temp = tempdir().unwrap();
        let runner = GateRunner::new(temp.path());

        let gates = vec![command_gate("fails", "false"), command_gate("never-runs", "touch ran.txt")];

        let err = runner.run_gates(&gates).await.unwrap_err();
        assert_eq!(err.gate, "fails");
        assert_eq!(err.attempts, 1);
        assert!(!temp.path().join("ran.txt").exists());
    }

    #[tokio::test]
    async fn test_skip_gate_continues() {
        let temp = tempdir().unwrap();
        let runner = GateRunner::new(temp.path());

        let mut failing = command_gate("fails", "false");
        failing.on_fail = OnFail::Skip;
        let gates = vec![failing, command_gate("runs", "touch ran.txt")];

        let results = runner.run_gates(&gates).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].passed);
        assert!(results[1].passed);
        assert!(temp.path().join("ran.txt").exists());
    }

    #[tokio::test]
    async fn test_retry_policy_behaves_like_skip_after_budget() {
        let temp = tempdir().unwrap();
        let runner = GateRunner::new(temp.path());

        let mut failing = command_gate("fails", "false");
        failing.on_fail = OnFail::Retry;
        failing.retry.max_attempts = 2;
        failing.retry.initial_delay = 0.01;
        let gates = vec![failing, command_gate("runs", "true")];

        let results = runner.run_gates(&gates).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].passed);
        assert_eq!(results[0].attempts, 2);
        assert!(results[1].passed);
    }

    #[tokio::test]
    async fn test_failed_attempts_recorded_as_max() {
        let temp = tempdir().unwrap();
        let runner = GateRunner::new(temp.path());

        let mut config = command_gate("fails", "false");
        config.on_fail = OnFail::Skip;
        config.retry.max_attempts = 3;
        config.retry.initial_delay = 0.01;

        let results = runner.run_gates(&[config]).await.unwrap();
        assert!(!results[0].passed);
        assert_eq!(results[0].attempts, 3);
    }
}
