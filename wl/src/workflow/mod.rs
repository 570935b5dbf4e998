//! Workflow data model
//!
//! Declarative types deserialized from the workflow YAML: steps, loops,
//! quality gates, and their retry policies. The loader builds a `Workflow`
//! from the raw document; the validator inspects the raw document itself.

mod loader;
pub mod validator;

pub use loader::{load_value, steps_from_value};
pub use validator::{ValidationIssue, ValidationResult, validate_workflow};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Sentinel: use the prior step's output as input
pub const STDIN: &str = "STDIN";
/// Sentinel: return the step's output to the caller
pub const STDOUT: &str = "STDOUT";
/// Sentinel: the step takes no input
pub const NA: &str = "NA";

/// Top-level keys that are not step names
pub const RESERVED_KEYS: &[&str] = &["defer", "loops", "execute_loops", "agentic-loop"];

/// A step's `input` field: a single value or a list of values
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StepInput {
    Single(String),
    Many(Vec<String>),
}

impl StepInput {
    /// Flatten to the authored list of input values.
    pub fn values(&self) -> Vec<&str> {
        match self {
            StepInput::Single(s) => vec![s.as_str()],
            StepInput::Many(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// Sub-block for steps that generate a new artifact from a prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateBlock {
    pub action: Option<String>,
    pub model: Option<String>,
    pub output: Option<String>,
}

/// A single unit of work inside a workflow or loop iteration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
    /// Step name, injected from the enclosing mapping key
    #[serde(skip)]
    pub name: String,

    pub input: Option<StepInput>,

    /// Provider hint passed through to the LLM client
    pub model: Option<String>,

    /// The prompt (or instruction) for this step
    pub action: Option<String>,

    /// `STDOUT`, a filename template, a pipe directive, or a variable name
    pub output: Option<String>,

    #[serde(rename = "type")]
    pub step_type: Option<String>,

    /// Split inputs larger than this many bytes and iterate over the pieces
    pub chunk: Option<usize>,

    /// How to process a list of inputs: `individual` or `combined`
    pub batch_mode: Option<String>,

    pub memory: Option<String>,

    pub tool_config: Option<serde_yaml::Value>,

    pub generate: Option<GenerateBlock>,

    pub process: Option<serde_yaml::Value>,

    /// Inline agentic loop attached to this step
    pub agentic_loop: Option<LoopConfig>,

    /// Marker for the codebase-indexing pre-step (external; recognized only)
    pub codebase_index: Option<serde_yaml::Value>,
}

impl Step {
    /// True for codebase-index steps, which take no `input`.
    pub fn is_codebase_index(&self) -> bool {
        self.codebase_index.is_some() || self.step_type.as_deref() == Some("codebase-index")
    }
}

fn default_max_iterations() -> i64 {
    10
}

/// Declarative per-loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Loop name, injected from the enclosing mapping key
    #[serde(skip)]
    pub name: String,

    /// Upper bound on iterations; zero or negative falls back to the default
    pub max_iterations: i64,

    /// Loop deadline in seconds; 0 means no deadline
    pub timeout_seconds: u64,

    /// How many history entries feed into each iteration's prompt
    pub context_window: usize,

    /// Checkpoint every N iterations when stateful
    pub checkpoint_interval: u32,

    /// `llm_decides` (default), `pattern_match`, or absent
    pub exit_condition: Option<String>,

    /// Regex for `pattern_match`; an empty pattern never exits
    pub exit_pattern: Option<String>,

    /// When true, the engine checkpoints and resumes
    pub stateful: bool,

    /// Filesystem roots the loop may touch (advisory; enforced by the host)
    pub allowed_paths: Vec<String>,

    /// Per-loop whitelist of tool names, overlaying the global allowlist
    pub tools: Vec<String>,

    #[serde(deserialize_with = "loader::de_steps")]
    pub steps: Vec<Step>,

    pub quality_gates: Vec<QualityGateConfig>,

    /// Names of loops that must complete before this one starts
    pub depends_on: Vec<String>,

    /// Variable to read the loop's initial input from
    pub input_state: Option<String>,

    /// Variable to write the loop's final output to
    pub output_state: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_iterations: default_max_iterations(),
            timeout_seconds: 0,
            context_window: 5,
            checkpoint_interval: 5,
            exit_condition: None,
            exit_pattern: None,
            stateful: false,
            allowed_paths: Vec::new(),
            tools: Vec::new(),
            steps: Vec::new(),
            quality_gates: Vec::new(),
            depends_on: Vec::new(),
            input_state: None,
            output_state: None,
        }
    }
}

impl LoopConfig {
    /// Iteration bound with zero/negative values normalized to the default.
    pub fn effective_max_iterations(&self) -> u32 {
        if self.max_iterations <= 0 {
            default_max_iterations() as u32
        } else {
            self.max_iterations as u32
        }
    }
}

/// On-fail policy for a quality gate, applied after its retry budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFail {
    #[default]
    Abort,
    Skip,
    /// The retry budget is already consumed inside the runner, so this
    /// behaves like `skip`
    Retry,
}

/// Backoff strategy between gate attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffType {
    #[default]
    Linear,
    Exponential,
}

/// Retry settings for a quality gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_type: BackoffType,
    /// Base delay in seconds
    pub initial_delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_type: BackoffType::Linear,
            initial_delay: 1.0,
        }
    }
}

/// Configuration for one quality gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGateConfig {
    pub name: String,

    /// `""`/`command`, `syntax`, `security`, or `test`
    #[serde(rename = "type")]
    pub gate_type: String,

    /// Shell command for command and test gates
    pub command: String,

    /// Per-attempt timeout in seconds
    pub timeout: u64,

    pub on_fail: OnFail,

    pub retry: RetryConfig,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            gate_type: String::new(),
            command: String::new(),
            timeout: 60,
            on_fail: OnFail::Abort,
            retry: RetryConfig::default(),
        }
    }
}

/// A parsed workflow file
#[derive(Debug, Clone)]
pub struct Workflow {
    pub path: PathBuf,

    /// Top-level steps in authored order
    pub steps: Vec<Step>,

    /// Deferred steps, keyed by name in the file
    pub defer: Vec<Step>,

    /// Loops in authored order
    pub loops: Vec<LoopConfig>,

    /// Which loops to execute, in the authored order
    pub execute_loops: Vec<String>,

    /// Single top-level `agentic-loop` block, if present
    pub agentic_loop: Option<LoopConfig>,

    /// The raw document, kept for the validator
    pub raw: serde_yaml::Value,
}

impl Workflow {
    pub fn get_loop(&self, name: &str) -> Option<&LoopConfig> {
        self.loops.iter().find(|l| l.name == name)
    }

    pub fn loop_names(&self) -> Vec<&str> {
        self.loops.iter().map(|l| l.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_config_defaults() {
        let config = LoopConfig::default();

        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.timeout_seconds, 0);
        assert_eq!(config.context_window, 5);
        assert_eq!(config.checkpoint_interval, 5);
        assert!(!config.stateful);
        assert!(config.steps.is_empty());
    }

    #[test]
    fn test_effective_max_iterations_normalizes() {
        let mut config = LoopConfig::default();
        assert_eq!(config.effective_max_iterations(), 10);

        config.max_iterations = 0;
        assert_eq!(config.effective_max_iterations(), 10);

        config.max_iterations = -3;
        assert_eq!(config.effective_max_iterations(), 10);

        config.max_iterations = 25;
        assert_eq!(config.effective_max_iterations(), 25);
    }

    #[test]
    fn test_deserialize_minimal_loop() {
        let yaml = r#"
steps:
  draft:
    action: "Write a draft"
    output: STDOUT
"#;
        let config: LoopConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.steps.len(), 1);
        assert_eq!(config.steps[0].name, "draft");
    }

    #[test]
    fn test_deserialize_full_loop() {
        let yaml = r#"
max_iterations: 3
timeout_seconds: 120
context_window: 2
checkpoint_interval: 1
exit_condition: pattern_match
exit_pattern: "^ship it$"
stateful: true
tools:
  - ls
  - cat
depends_on:
  - backend
input_state: PLAN
output_state: RESULT
steps:
  work:
    action: "Do the work"
    output: STDOUT
quality_gates:
  - name: tests
    type: test
    command: "cargo test"
    on_fail: skip
    retry:
      max_attempts: 3
      backoff_type: exponential
      initial_delay: 2
"#;
        let config: LoopConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.exit_condition.as_deref(), Some("pattern_match"));
        assert!(config.stateful);
        assert_eq!(config.depends_on, vec!["backend"]);
        assert_eq!(config.quality_gates.len(), 1);

        let gate = &config.quality_gates[0];
        assert_eq!(gate.gate_type, "test");
        assert_eq!(gate.on_fail, OnFail::Skip);
        assert_eq!(gate.retry.max_attempts, 3);
        assert_eq!(gate.retry.backoff_type, BackoffType::Exponential);
    }

    #[test]
    fn test_gate_defaults() {
        let gate: QualityGateConfig = serde_yaml::from_str("name: lint\ncommand: \"true\"\n").unwrap();

        assert_eq!(gate.gate_type, "");
        assert_eq!(gate.timeout, 60);
        assert_eq!(gate.on_fail, OnFail::Abort);
        assert_eq!(gate.retry.max_attempts, 1);
        assert_eq!(gate.retry.backoff_type, BackoffType::Linear);
    }

    #[test]
    fn test_step_input_forms() {
        let single: StepInput = serde_yaml::from_str("\"data.txt\"").unwrap();
        assert_eq!(single.values(), vec!["data.txt"]);

        let many: StepInput = serde_yaml::from_str("[a.txt, b.txt]").unwrap();
        assert_eq!(many.values(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_codebase_index_detection() {
        let step = Step {
            step_type: Some("codebase-index".to_string()),
            ..Default::default()
        };
        assert!(step.is_codebase_index());
        assert!(!Step::default().is_codebase_index());
    }
}
