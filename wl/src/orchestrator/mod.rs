//! Loop orchestration
//!
//! Executes a workflow: validates the global tool switch, orders loops by
//! their dependencies, pipes results between them through the variable
//! map, and runs any plain top-level steps. Loops run sequentially in
//! topological order; a failed loop aborts the orchestration.

mod graph;

pub use graph::DependencyGraph;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{Config, agentic_tools_allowed};
use crate::error::EngineError;
use crate::gates::GateRunner;
use crate::llm::LlmClient;
use crate::r#loop::{LoopEngine, LoopStatus};
use crate::state::{LoopStateStore, workflow_checksum};
use crate::step::StepExecutor;
use crate::tools::{ToolExecutor, ToolPolicy};
use crate::vars::VariableMap;
use crate::workflow::{LoopConfig, NA, Workflow};

/// Record of one loop's execution
#[derive(Debug, Clone)]
pub struct LoopRun {
    pub loop_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: LoopStatus,
    pub result: String,
}

/// Outcome of a whole workflow run
#[derive(Debug, Clone, Default)]
pub struct WorkflowOutcome {
    pub runs: Vec<LoopRun>,
    /// Final output of the last loop or step that produced one
    pub final_output: String,
}

/// Runs a workflow's loops and steps against a working directory
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    config: Config,
    work_dir: PathBuf,
    cli_vars: BTreeMap<String, String>,
    /// Override for the loop-state directory (tests and CLI)
    state_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, config: Config, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            config,
            work_dir: work_dir.into(),
            cli_vars: BTreeMap::new(),
            state_dir: None,
        }
    }

    pub fn with_cli_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.cli_vars = vars;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Execute a workflow: loops (when `execute_loops` or a top-level
    /// agentic loop is present) and otherwise its plain steps.
    pub async fn execute_workflow(
        &self,
        workflow: &Workflow,
        vars: &mut VariableMap,
    ) -> Result<WorkflowOutcome, EngineError> {
        self.check_agentic_tools_switch(workflow)?;

        if !workflow.loops.is_empty() {
            return self.run_loops(workflow, vars).await;
        }

        if let Some(agentic) = &workflow.agentic_loop {
            let run = self.run_loop(agentic, NA, vars, &workflow.path).await?;
            let final_output = run.result.clone();
            return Ok(WorkflowOutcome {
                runs: vec![run],
                final_output,
            });
        }

        self.run_steps(workflow, vars).await
    }

    /// Pre-flight: loops that declare `allowed_paths` refuse to start when
    /// the global agentic-tools switch is off.
    fn check_agentic_tools_switch(&self, workflow: &Workflow) -> Result<(), EngineError> {
        if agentic_tools_allowed() {
            return Ok(());
        }

        let offender = workflow
            .loops
            .iter()
            .chain(workflow.agentic_loop.as_ref())
            .find(|l| !l.allowed_paths.is_empty());

        if let Some(config) = offender {
            return Err(EngineError::Policy(format!(
                "agentic tools are disabled ({}), but loop '{}' declares allowed_paths",
                crate::config::ALLOW_AGENTIC_TOOLS_ENV,
                config.name
            )));
        }
        Ok(())
    }

    async fn run_loops(&self, workflow: &Workflow, vars: &mut VariableMap) -> Result<WorkflowOutcome, EngineError> {
        let graph = DependencyGraph::from_loops(&workflow.loops)?;

        let targets: Vec<String> = if workflow.execute_loops.is_empty() {
            workflow.loops.iter().map(|l| l.name.clone()).collect()
        } else {
            workflow.execute_loops.clone()
        };

        let order = graph.execution_order(&targets)?;
        info!(?order, "executing loops in topological order");

        let mut results: BTreeMap<String, String> = BTreeMap::new();
        let mut runs = Vec::with_capacity(order.len());
        let mut final_output = String::new();

        for name in &order {
            let config = workflow
                .get_loop(name)
                .ok_or_else(|| EngineError::Dependency(format!("unknown loop '{}'", name)))?;

            // Resolve the loop's initial input
            let initial_input = if let Some(input_state) = &config.input_state {
                vars.get(input_state)
                    .ok_or_else(|| {
                        EngineError::Config(format!(
                            "loop '{}': input_state variable '{}' is not set",
                            name, input_state
                        ))
                    })?
                    .to_string()
            } else if let Some(dep) = config.depends_on.first() {
                results.get(dep).cloned().ok_or_else(|| {
                    EngineError::Dependency(format!("loop '{}': predecessor '{}' produced no result", name, dep))
                })?
            } else {
                NA.to_string()
            };

            debug!(loop_name = %name, input_len = initial_input.len(), "running loop");
            let run = self.run_loop(config, &initial_input, vars, &workflow.path).await?;

            results.insert(name.clone(), run.result.clone());
            if let Some(output_state) = &config.output_state {
                vars.set(output_state.clone(), run.result.clone());
            }
            final_output = run.result.clone();
            runs.push(run);
        }

        Ok(WorkflowOutcome { runs, final_output })
    }

    /// Run one loop and record its timing and result.
    async fn run_loop(
        &self,
        config: &LoopConfig,
        initial_input: &str,
        vars: &mut VariableMap,
        workflow_path: &std::path::Path,
    ) -> Result<LoopRun, EngineError> {
        let policy = ToolPolicy::new(
            self.config.tools.allow.iter().cloned(),
            self.config.tools.deny.iter().cloned(),
        )
        .with_whitelist(&config.tools);

        let tools = ToolExecutor::new(policy, &self.work_dir)
            .with_timeout(Duration::from_secs(self.config.tools.timeout_seconds.max(1)));

        let steps = StepExecutor::new(self.llm.clone(), tools, &self.work_dir)
            .with_cli_vars(self.cli_vars.clone())
            .with_default_model(self.config.provider.model.clone());

        let mut engine = LoopEngine::new(config.clone(), steps, GateRunner::new(&self.work_dir));

        if config.stateful {
            let dir = self
                .state_dir
                .clone()
                .or_else(|| self.config.state.dir.clone())
                .unwrap_or_else(LoopStateStore::default_dir);
            let store = LoopStateStore::open(dir)?;
            let checksum = workflow_checksum(workflow_path)?;
            engine = engine.with_state(store, workflow_path.to_path_buf(), checksum);
        }

        let start_time = Utc::now();
        match engine.run(initial_input, vars).await {
            Ok(outcome) => Ok(LoopRun {
                loop_name: config.name.clone(),
                start_time,
                end_time: Utc::now(),
                status: outcome.status,
                result: outcome.output,
            }),
            Err(e) => {
                warn!(loop_name = %config.name, error = %e, "loop failed; aborting orchestration");
                Err(e)
            }
        }
    }

    /// Run plain top-level steps sequentially, threading outputs.
    async fn run_steps(&self, workflow: &Workflow, vars: &mut VariableMap) -> Result<WorkflowOutcome, EngineError> {
        let policy = ToolPolicy::new(
            self.config.tools.allow.iter().cloned(),
            self.config.tools.deny.iter().cloned(),
        );
        let tools = ToolExecutor::new(policy, &self.work_dir)
            .with_timeout(Duration::from_secs(self.config.tools.timeout_seconds.max(1)));
        let executor = StepExecutor::new(self.llm.clone(), tools, &self.work_dir)
            .with_cli_vars(self.cli_vars.clone())
            .with_default_model(self.config.provider.model.clone());

        let mut prior = String::new();
        for step in &workflow.steps {
            debug!(step = %step.name, "running top-level step");
            prior = executor
                .execute(step, &prior, vars)
                .await
                .map_err(|e| EngineError::Step {
                    loop_name: "workflow".to_string(),
                    iteration: 0,
                    message: e.to_string(),
                })?;
        }

        Ok(WorkflowOutcome {
            runs: Vec::new(),
            final_output: prior,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoClient;
    use crate::workflow::{Step, StepInput};
    use serial_test::serial;
    use tempfile::tempdir;

    fn echo_step(name: &str, action: &str) -> Step {
        Step {
            name: name.to_string(),
            input: Some(StepInput::Single(NA.to_string())),
            action: Some(action.to_string()),
            output: Some("STDOUT".to_string()),
            ..Default::default()
        }
    }

    fn workflow_with_loops(loops: Vec<LoopConfig>, execute: Vec<&str>) -> Workflow {
        Workflow {
            path: PathBuf::from("workflow.yml"),
            steps: Vec::new(),
            defer: Vec::new(),
            loops,
            execute_loops: execute.into_iter().map(String::from).collect(),
            agentic_loop: None,
            raw: serde_yaml::Value::Null,
        }
    }

    fn quick_loop(name: &str, deps: &[&str], output_state: Option<&str>) -> LoopConfig {
        LoopConfig {
            name: name.to_string(),
            max_iterations: 1,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            output_state: output_state.map(String::from),
            steps: vec![echo_step("work", &format!("ran {}", name))],
            ..Default::default()
        }
    }

    fn orchestrator(work_dir: &std::path::Path) -> Orchestrator {
        Orchestrator::new(Arc::new(EchoClient), Config::default(), work_dir)
    }

    #[tokio::test]
    #[serial]
    async fn test_loops_run_in_dependency_order() {
        let temp = tempdir().unwrap();
        let workflow = workflow_with_loops(
            vec![
                quick_loop("frontend", &["backend"], None),
                quick_loop("backend", &[], None),
                quick_loop("compile", &["frontend"], None),
            ],
            vec![],
        );

        let mut vars = VariableMap::new();
        let outcome = orchestrator(temp.path())
            .execute_workflow(&workflow, &mut vars)
            .await
            .unwrap();

        let order: Vec<&str> = outcome.runs.iter().map(|r| r.loop_name.as_str()).collect();
        assert_eq!(order, vec!["backend", "frontend", "compile"]);
        assert!(outcome.runs.iter().all(|r| r.status == LoopStatus::Completed));
    }

    #[tokio::test]
    #[serial]
    async fn test_cycle_aborts_before_any_loop_runs() {
        let temp = tempdir().unwrap();
        let workflow = workflow_with_loops(
            vec![
                quick_loop("a", &["b"], None),
                quick_loop("b", &["c"], None),
                quick_loop("c", &["a"], None),
            ],
            vec![],
        );

        let mut vars = VariableMap::new();
        let err = orchestrator(temp.path())
            .execute_workflow(&workflow, &mut vars)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    #[serial]
    async fn test_output_state_piped_to_variable_map() {
        let temp = tempdir().unwrap();
        let workflow = workflow_with_loops(vec![quick_loop("producer", &[], Some("PRODUCT"))], vec![]);

        let mut vars = VariableMap::new();
        orchestrator(temp.path())
            .execute_workflow(&workflow, &mut vars)
            .await
            .unwrap();

        assert!(vars.get("PRODUCT").unwrap().contains("ran producer"));
    }

    #[tokio::test]
    #[serial]
    async fn test_input_state_read_from_variable_map() {
        let temp = tempdir().unwrap();
        let mut consumer = quick_loop("consumer", &[], None);
        consumer.input_state = Some("SEED".to_string());
        consumer.steps = vec![Step {
            name: "work".to_string(),
            input: Some(StepInput::Single("STDIN".to_string())),
            action: Some("act".to_string()),
            output: Some("STDOUT".to_string()),
            ..Default::default()
        }];
        let workflow = workflow_with_loops(vec![consumer], vec![]);

        let mut vars = VariableMap::new();
        vars.set("SEED", "planted value");
        let outcome = orchestrator(temp.path())
            .execute_workflow(&workflow, &mut vars)
            .await
            .unwrap();

        assert!(outcome.final_output.contains("planted value"));
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_input_state_errors() {
        let temp = tempdir().unwrap();
        let mut consumer = quick_loop("consumer", &[], None);
        consumer.input_state = Some("NEVER_SET".to_string());
        let workflow = workflow_with_loops(vec![consumer], vec![]);

        let mut vars = VariableMap::new();
        let err = orchestrator(temp.path())
            .execute_workflow(&workflow, &mut vars)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("NEVER_SET"));
    }

    #[tokio::test]
    #[serial]
    async fn test_execute_loops_selects_subset() {
        let temp = tempdir().unwrap();
        let workflow = workflow_with_loops(
            vec![
                quick_loop("wanted", &[], None),
                quick_loop("unwanted", &[], None),
            ],
            vec!["wanted"],
        );

        let mut vars = VariableMap::new();
        let outcome = orchestrator(temp.path())
            .execute_workflow(&workflow, &mut vars)
            .await
            .unwrap();

        assert_eq!(outcome.runs.len(), 1);
        assert_eq!(outcome.runs[0].loop_name, "wanted");
    }

    #[tokio::test]
    #[serial]
    async fn test_top_level_steps_thread_outputs() {
        let temp = tempdir().unwrap();
        let workflow = Workflow {
            path: PathBuf::from("workflow.yml"),
            steps: vec![
                echo_step("first", "produce something"),
                Step {
                    name: "second".to_string(),
                    input: Some(StepInput::Single("STDIN".to_string())),
                    action: Some("refine".to_string()),
                    output: Some("STDOUT".to_string()),
                    ..Default::default()
                },
            ],
            defer: Vec::new(),
            loops: Vec::new(),
            execute_loops: Vec::new(),
            agentic_loop: None,
            raw: serde_yaml::Value::Null,
        };

        let mut vars = VariableMap::new();
        let outcome = orchestrator(temp.path())
            .execute_workflow(&workflow, &mut vars)
            .await
            .unwrap();

        assert!(outcome.final_output.contains("refine"));
        assert!(outcome.final_output.contains("produce something"));
    }

    #[tokio::test]
    #[serial]
    async fn test_agentic_tools_switch_blocks_allowed_paths() {
        let temp = tempdir().unwrap();
        let mut restricted = quick_loop("restricted", &[], None);
        restricted.allowed_paths = vec!["src/".to_string()];
        let workflow = workflow_with_loops(vec![restricted], vec![]);

        unsafe { std::env::set_var(crate::config::ALLOW_AGENTIC_TOOLS_ENV, "false") };
        let mut vars = VariableMap::new();
        let result = orchestrator(temp.path()).execute_workflow(&workflow, &mut vars).await;
        unsafe { std::env::remove_var(crate::config::ALLOW_AGENTIC_TOOLS_ENV) };

        let err = result.unwrap_err();
        assert!(matches!(err, EngineError::Policy(_)));
        assert!(err.to_string().contains("restricted"));
    }
}
