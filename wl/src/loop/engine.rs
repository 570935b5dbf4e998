//! LoopEngine - drives a single loop to completion
//!
//! Each iteration threads the loop's steps through the step executor,
//! appends to history, runs the quality gates, checkpoints when due, and
//! evaluates the exit condition. Timeouts pause the loop with state saved;
//! step and abort-level gate failures mark it failed.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::gates::{GateRunner, QualityGateResult};
use crate::state::{LoopStateStore, PersistedLoopState, StateError};
use crate::step::StepExecutor;
use crate::vars::VariableMap;
use crate::workflow::LoopConfig;

use super::context::{LoopContext, LoopStatus};
use super::exit::evaluate_exit;

/// Final result of a loop run
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub status: LoopStatus,
    /// Output of the last completed iteration
    pub output: String,
    pub iterations: u32,
    pub exit_reason: Option<String>,
}

/// Executes one loop's iterations
pub struct LoopEngine {
    config: LoopConfig,
    steps: StepExecutor,
    gates: GateRunner,
    store: Option<LoopStateStore>,
    workflow_file: PathBuf,
    workflow_checksum: String,
}

impl LoopEngine {
    pub fn new(config: LoopConfig, steps: StepExecutor, gates: GateRunner) -> Self {
        Self {
            config,
            steps,
            gates,
            store: None,
            workflow_file: PathBuf::new(),
            workflow_checksum: String::new(),
        }
    }

    /// Enable checkpointing against the given store. The checksum guards
    /// resumption: saved state from a different workflow file is discarded.
    pub fn with_state(mut self, store: LoopStateStore, workflow_file: PathBuf, workflow_checksum: String) -> Self {
        self.store = Some(store);
        self.workflow_file = workflow_file;
        self.workflow_checksum = workflow_checksum;
        self
    }

    /// Run the loop until its exit condition fires, `max_iterations` is
    /// reached, a failure occurs, or the deadline passes.
    pub async fn run(&mut self, initial_input: &str, vars: &mut VariableMap) -> Result<LoopOutcome, EngineError> {
        let loop_name = self.config.name.clone();

        if self.config.steps.is_empty() {
            return Err(EngineError::Config(format!(
                "agentic loop '{}' has no steps defined",
                loop_name
            )));
        }

        let max_iterations = self.config.effective_max_iterations();
        let mut context = self.restore_or_fresh(initial_input, vars);
        let deadline = (self.config.timeout_seconds > 0)
            .then(|| Instant::now() + Duration::from_secs(self.config.timeout_seconds));

        info!(
            loop_name = %loop_name,
            max_iterations,
            resume_from = context.iteration,
            stateful = self.config.stateful,
            "starting loop"
        );

        let mut last_gate_results: Option<Vec<QualityGateResult>> = None;
        let mut exit_reason = None;

        while context.iteration < max_iterations {
            // Deadline is checked at iteration boundaries, not mid-step
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                warn!(loop_name = %loop_name, iteration = context.iteration, "loop deadline passed; pausing");
                self.persist(&context, LoopStatus::Paused, vars, &last_gate_results)?;
                return Err(EngineError::Timeout {
                    loop_name,
                    iteration: context.iteration,
                });
            }

            let iteration = context.begin_iteration();
            info!(loop_name = %loop_name, iteration, max_iterations, "loop iteration");

            // Loop variables are visible to steps via $-substitution
            vars.set("loop.iteration", iteration.to_string());
            vars.set("loop.previous_output", context.previous_output.clone());
            vars.set("loop.total_iterations", max_iterations.to_string());
            vars.set("loop.elapsed_seconds", context.elapsed_seconds().to_string());

            let iteration_input = build_iteration_input(&context, self.config.context_window);

            // Run the steps, threading each output into the next step
            let mut prior = iteration_input;
            for step in &self.config.steps {
                debug!(loop_name = %loop_name, iteration, step = %step.name, "running step");
                match self.steps.execute(step, &prior, vars).await {
                    Ok(output) => prior = output,
                    Err(e) => {
                        warn!(loop_name = %loop_name, iteration, step = %step.name, error = %e, "step failed");
                        self.persist(&context, LoopStatus::Failed, vars, &last_gate_results)?;
                        return Err(EngineError::Step {
                            loop_name,
                            iteration,
                            message: e.to_string(),
                        });
                    }
                }
            }

            context.complete_iteration(prior);

            // Quality gates observe all side effects of this iteration's steps
            match self.gates.run_gates(&self.config.quality_gates).await {
                Ok(results) => {
                    if !results.is_empty() {
                        last_gate_results = Some(results);
                    }
                }
                Err(failure) => {
                    warn!(loop_name = %loop_name, iteration, gate = %failure.gate, "abort-level gate failure");
                    self.persist(&context, LoopStatus::Failed, vars, &last_gate_results)?;
                    return Err(EngineError::Gate {
                        loop_name,
                        iteration,
                        gate: failure.gate,
                        attempts: failure.attempts,
                        message: failure.message,
                    });
                }
            }

            if self.config.stateful
                && self.config.checkpoint_interval > 0
                && iteration % self.config.checkpoint_interval == 0
            {
                debug!(loop_name = %loop_name, iteration, "checkpoint interval reached");
                self.persist(&context, LoopStatus::Running, vars, &last_gate_results)?;
            }

            if let Some(reason) = evaluate_exit(&self.config, &context.previous_output) {
                info!(loop_name = %loop_name, iteration, %reason, "exit condition met");
                exit_reason = Some(reason);
                break;
            }
        }

        self.persist(&context, LoopStatus::Completed, vars, &last_gate_results)?;
        info!(loop_name = %loop_name, iterations = context.iteration, "loop completed");

        Ok(LoopOutcome {
            status: LoopStatus::Completed,
            output: context.previous_output,
            iterations: context.iteration,
            exit_reason,
        })
    }

    /// Restore saved state when stateful and the workflow is unchanged;
    /// start fresh otherwise.
    fn restore_or_fresh(&self, initial_input: &str, vars: &mut VariableMap) -> LoopContext {
        let Some(store) = (self.config.stateful).then_some(self.store.as_ref()).flatten() else {
            return LoopContext::fresh(initial_input);
        };

        match store.load(&self.config.name) {
            Ok(saved) => {
                if saved.workflow_checksum == self.workflow_checksum {
                    info!(
                        loop_name = %self.config.name,
                        iteration = saved.context.iteration,
                        status = %saved.status,
                        "resuming loop from saved state"
                    );
                    vars.restore(saved.variables);
                    saved.context
                } else {
                    warn!(
                        loop_name = %self.config.name,
                        "workflow file changed since last checkpoint; discarding saved state"
                    );
                    LoopContext::fresh(initial_input)
                }
            }
            Err(StateError::NotFound(_)) => LoopContext::fresh(initial_input),
            Err(e) => {
                warn!(loop_name = %self.config.name, error = %e, "failed to load saved state; starting fresh");
                LoopContext::fresh(initial_input)
            }
        }
    }

    fn persist(
        &self,
        context: &LoopContext,
        status: LoopStatus,
        vars: &VariableMap,
        gate_results: &Option<Vec<QualityGateResult>>,
    ) -> Result<(), EngineError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let state = PersistedLoopState {
            loop_name: self.config.name.clone(),
            status,
            context: context.clone(),
            workflow_file: self.workflow_file.clone(),
            workflow_checksum: self.workflow_checksum.clone(),
            variables: vars.snapshot(),
            quality_gate_results: gate_results.clone(),
        };
        store.save(&state)?;
        Ok(())
    }
}

/// Assemble an iteration's input: up to `window` recent history entries
/// under a "Previous Iterations" heading, then the current input.
fn build_iteration_input(context: &LoopContext, window: usize) -> String {
    let mut input = String::new();

    if !context.history.is_empty() && window > 0 {
        input.push_str("Previous Iterations:\n");
        let skip = context.history.len().saturating_sub(window);
        for entry in &context.history[skip..] {
            input.push_str(&format!("[Iteration {}]\n{}\n\n", entry.index, entry.output));
        }
    }

    input.push_str("Current Iteration:\n");
    input.push_str(&context.previous_output);
    input
}
