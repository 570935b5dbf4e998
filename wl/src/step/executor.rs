//! StepExecutor - runs one step against a provider or tool

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::llm::LlmClient;
use crate::tools::{ToolExecutor, parse_tool_input, parse_tool_output};
use crate::vars::{VariableMap, is_variable_name, render_template};
use crate::workflow::{NA, STDIN, STDOUT, Step};

use super::StepError;

/// Timeout for URL inputs
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes workflow steps: input resolution, variable substitution,
/// chunking and batching, provider/tool invocation, output placement.
pub struct StepExecutor {
    llm: Arc<dyn LlmClient>,
    tools: ToolExecutor,
    work_dir: PathBuf,
    cli_vars: BTreeMap<String, String>,
    default_model: String,
    http: reqwest::Client,
}

impl StepExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolExecutor, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            tools,
            work_dir: work_dir.into(),
            cli_vars: BTreeMap::new(),
            default_model: "default".to_string(),
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Template variables provided on the command line (`{{name}}`).
    pub fn with_cli_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.cli_vars = vars;
        self
    }

    /// Model hint used when a step does not set one.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Execute a step. `prior` is the previous step's output (consumed via
    /// the `STDIN` sentinel or pipe directives); the returned string
    /// becomes the next step's `prior`.
    pub async fn execute(&self, step: &Step, prior: &str, vars: &mut VariableMap) -> Result<String, StepError> {
        debug!(step = %step.name, "StepExecutor::execute");

        // Codebase indexing is an external pre-step; record the marker
        // variable and pass the prior output through untouched.
        if step.is_codebase_index() {
            if let Some(output) = step.output.as_deref()
                && is_variable_name(output.trim())
            {
                vars.set(output.trim(), String::new());
            }
            return Ok(prior.to_string());
        }

        // generate sub-blocks carry their own action/output/model
        let (action_raw, output_raw, model_raw) = match &step.generate {
            Some(generate) => (
                generate.action.as_deref(),
                generate.output.as_deref(),
                generate.model.as_deref().or(step.model.as_deref()),
            ),
            None => (step.action.as_deref(), step.output.as_deref(), step.model.as_deref()),
        };

        let action_raw = action_raw.ok_or_else(|| StepError::MissingAction {
            step: step.name.clone(),
        })?;
        let action = vars.substitute(&render_template(action_raw, &self.cli_vars));
        let model = model_raw.unwrap_or(&self.default_model).to_string();

        let mut units = self.resolve_inputs(step, prior, vars).await?;

        if let Some(chunk_size) = step.chunk
            && chunk_size > 0
        {
            units = units
                .iter()
                .flat_map(|unit| split_chunks(unit, chunk_size))
                .collect();
        }

        let individual =
            units.len() > 1 && (step.chunk.is_some() || step.batch_mode.as_deref() == Some("individual"));

        if individual {
            let total = units.len();
            debug!(step = %step.name, total, "processing inputs individually");
            let mut outputs = Vec::with_capacity(total);
            for (index, unit) in units.iter().enumerate() {
                let out = self.invoke(&step.name, &model, &action, unit).await?;
                let placed = self
                    .place_output(&step.name, output_raw, out, vars, Some((index + 1, total)))
                    .await?;
                outputs.push(placed);
            }
            Ok(outputs.join("\n"))
        } else {
            let combined = units.join("\n\n");
            let out = self.invoke(&step.name, &model, &action, &combined).await?;
            self.place_output(&step.name, output_raw, out, vars, None).await
        }
    }

    /// Resolve the step's `input` field to a list of input units.
    async fn resolve_inputs(&self, step: &Step, prior: &str, vars: &VariableMap) -> Result<Vec<String>, StepError> {
        let Some(input) = &step.input else {
            return Ok(Vec::new());
        };

        let mut units = Vec::new();
        for raw in input.values() {
            let value = vars.substitute(&render_template(raw, &self.cli_vars));
            let trimmed = value.trim();

            if trimmed.is_empty() || trimmed == NA {
                continue;
            }

            if trimmed == STDIN {
                debug!(step = %step.name, "input: prior output");
                units.push(prior.to_string());
                continue;
            }

            if let Some(directive) = parse_tool_input(trimmed).map_err(|source| StepError::Tool {
                step: step.name.clone(),
                source,
            })? {
                debug!(step = %step.name, command = %directive.command, uses_pipe = directive.uses_pipe, "input: tool directive");
                let stdin = directive.uses_pipe.then_some(prior);
                let out = self
                    .tools
                    .run(&directive.command, stdin)
                    .await
                    .map_err(|source| StepError::Tool {
                        step: step.name.clone(),
                        source,
                    })?;
                units.push(out.stdout);
                continue;
            }

            if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
                debug!(step = %step.name, url = %trimmed, "input: fetching URL");
                units.push(self.fetch_url(&step.name, trimmed).await?);
                continue;
            }

            if trimmed.contains(['*', '?', '[']) && !trimmed.contains(char::is_whitespace) {
                units.extend(self.expand_glob(&step.name, trimmed)?);
                continue;
            }

            let candidate = self.resolve_path(trimmed);
            if candidate.is_file() {
                debug!(step = %step.name, path = %candidate.display(), "input: reading file");
                let content = std::fs::read_to_string(&candidate).map_err(|source| StepError::Io {
                    step: step.name.clone(),
                    source,
                })?;
                units.push(content);
                continue;
            }

            if looks_like_path(trimmed) {
                return Err(StepError::InputFileNotFound {
                    step: step.name.clone(),
                    path: trimmed.to_string(),
                });
            }

            debug!(step = %step.name, "input: literal text");
            units.push(value);
        }
        Ok(units)
    }

    async fn fetch_url(&self, step: &str, url: &str) -> Result<String, StepError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StepError::Fetch {
                step: step.to_string(),
                url: url.to_string(),
                message: e.to_string(),
            })?;

        response.text().await.map_err(|e| StepError::Fetch {
            step: step.to_string(),
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    fn expand_glob(&self, step: &str, pattern: &str) -> Result<Vec<String>, StepError> {
        let full_pattern = self.resolve_path(pattern).to_string_lossy().to_string();
        let paths = glob::glob(&full_pattern).map_err(|e| StepError::Invalid {
            step: step.to_string(),
            message: format!("invalid glob pattern '{}': {}", pattern, e),
        })?;

        let mut units = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| StepError::Invalid {
                step: step.to_string(),
                message: format!("glob error under '{}': {}", pattern, e),
            })?;
            if path.is_file() {
                let content = std::fs::read_to_string(&path).map_err(|source| StepError::Io {
                    step: step.to_string(),
                    source,
                })?;
                units.push(content);
            }
        }

        if units.is_empty() {
            return Err(StepError::NoGlobMatches {
                step: step.to_string(),
                pattern: pattern.to_string(),
            });
        }
        debug!(%step, %pattern, matches = units.len(), "input: expanded glob");
        Ok(units)
    }

    async fn invoke(&self, step: &str, model: &str, action: &str, input: &str) -> Result<String, StepError> {
        let prompt = if input.is_empty() {
            action.to_string()
        } else {
            format!("{}\n\n{}", action, input)
        };

        debug!(%step, %model, prompt_len = prompt.len(), "invoking provider");
        self.llm
            .prompt(model, &prompt)
            .await
            .map_err(|source| StepError::Provider {
                step: step.to_string(),
                source,
            })
    }

    /// Place the step output per its `output` field and return the string
    /// that threads into the next step.
    async fn place_output(
        &self,
        step: &str,
        output: Option<&str>,
        produced: String,
        vars: &mut VariableMap,
        batch: Option<(usize, usize)>,
    ) -> Result<String, StepError> {
        let Some(raw) = output else {
            return Ok(produced);
        };
        let value = raw.trim();

        if value == STDOUT {
            return Ok(produced);
        }

        if let Some(directive) = parse_tool_output(value).map_err(|source| StepError::Tool {
            step: step.to_string(),
            source,
        })? {
            let stdin = directive.uses_pipe.then_some(produced.as_str());
            debug!(%step, command = %directive.command, uses_pipe = directive.uses_pipe, "output: tool directive");
            let out = self
                .tools
                .run(&directive.command, stdin)
                .await
                .map_err(|source| StepError::Tool {
                    step: step.to_string(),
                    source,
                })?;
            return Ok(out.stdout);
        }

        if is_variable_name(value) {
            debug!(%step, variable = %value, "output: storing variable");
            vars.set(value, produced.clone());
            return Ok(produced);
        }

        // Filename template
        let mut path_str = vars.substitute(&render_template(value, &self.cli_vars));
        if let Some((index, total)) = batch {
            let mut batch_vars = BTreeMap::new();
            batch_vars.insert("chunk_index".to_string(), index.to_string());
            batch_vars.insert("total_chunks".to_string(), total.to_string());
            path_str = render_template(&path_str, &batch_vars);
        }

        if let Some(name) = unresolved_variable(&path_str) {
            return Err(StepError::UnresolvedVariable {
                step: step.to_string(),
                name,
            });
        }

        let path = self.resolve_path(&path_str);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StepError::Io {
                step: step.to_string(),
                source,
            })?;
        }
        std::fs::write(&path, &produced).map_err(|source| StepError::Io {
            step: step.to_string(),
            source,
        })?;
        info!(%step, path = %path.display(), bytes = produced.len(), "wrote step output");

        Ok(produced)
    }

    fn resolve_path(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }
}

/// A leftover `$NAME` token after substitution, if any.
fn unresolved_variable(text: &str) -> Option<String> {
    let re = Regex::new(r"\$([A-Z][A-Z0-9_]*)").ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

/// Whether an input value that is not an existing file was probably meant
/// to be one.
fn looks_like_path(value: &str) -> bool {
    if value.contains(char::is_whitespace) {
        return false;
    }
    if value.contains('/') {
        return true;
    }
    value
        .rsplit_once('.')
        .map(|(stem, ext)| {
            !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or(false)
}

/// Split text into pieces of at most `size` bytes on char boundaries.
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    if text.len() <= size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + size).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single char wider than the chunk size; take it whole
            end = (start + 1..=text.len())
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(text.len());
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EchoClient, ScriptedClient};
    use crate::tools::ToolPolicy;
    use crate::workflow::StepInput;
    use tempfile::tempdir;

    fn executor(work_dir: &Path) -> StepExecutor {
        StepExecutor::new(
            Arc::new(EchoClient),
            ToolExecutor::new(ToolPolicy::default(), work_dir),
            work_dir,
        )
    }

    fn step(name: &str, input: Option<&str>, action: &str, output: &str) -> Step {
        Step {
            name: name.to_string(),
            input: input.map(|i| StepInput::Single(i.to_string())),
            action: Some(action.to_string()),
            output: Some(output.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_na_input_prompts_action_only() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let out = executor(temp.path())
            .execute(&step("s", Some("NA"), "just the action", "STDOUT"), "prior", &mut vars)
            .await
            .unwrap();

        assert_eq!(out, "just the action");
    }

    #[tokio::test]
    async fn test_stdin_input_threads_prior_output() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let out = executor(temp.path())
            .execute(&step("s", Some("STDIN"), "act", "STDOUT"), "from before", &mut vars)
            .await
            .unwrap();

        assert_eq!(out, "act\n\nfrom before");
    }

    #[tokio::test]
    async fn test_file_input_read_from_work_dir() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("notes.txt"), "file content").unwrap();
        let mut vars = VariableMap::new();

        let out = executor(temp.path())
            .execute(&step("s", Some("notes.txt"), "act", "STDOUT"), "", &mut vars)
            .await
            .unwrap();

        assert!(out.contains("file content"));
    }

    #[tokio::test]
    async fn test_missing_input_file_errors_with_step_name() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let err = executor(temp.path())
            .execute(&step("reader", Some("absent.txt"), "act", "STDOUT"), "", &mut vars)
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::InputFileNotFound { .. }));
        assert!(err.to_string().contains("reader"));
        assert!(err.to_string().contains("absent.txt"));
    }

    #[tokio::test]
    async fn test_tool_directive_input() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let out = executor(temp.path())
            .execute(&step("s", Some("tool: echo from-tool"), "act", "STDOUT"), "", &mut vars)
            .await
            .unwrap();

        assert!(out.contains("from-tool"));
    }

    #[tokio::test]
    async fn test_stdin_pipe_directive_input() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let out = executor(temp.path())
            .execute(
                &step("s", Some("STDIN|sort"), "act", "STDOUT"),
                "b\na\n",
                &mut vars,
            )
            .await
            .unwrap();

        assert!(out.contains("a\nb"));
    }

    #[tokio::test]
    async fn test_denied_tool_directive_surfaces_policy_error() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let err = executor(temp.path())
            .execute(&step("s", Some("tool: rm -rf ."), "act", "STDOUT"), "", &mut vars)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("denylist"));
    }

    #[tokio::test]
    async fn test_output_to_file_template() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let out = executor(temp.path())
            .execute(&step("s", Some("NA"), "write me", "result.md"), "", &mut vars)
            .await
            .unwrap();

        assert_eq!(out, "write me");
        let written = std::fs::read_to_string(temp.path().join("result.md")).unwrap();
        assert_eq!(written, "write me");
    }

    #[tokio::test]
    async fn test_output_to_variable() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        executor(temp.path())
            .execute(&step("s", Some("NA"), "stored value", "RESULT"), "", &mut vars)
            .await
            .unwrap();

        assert_eq!(vars.get("RESULT"), Some("stored value"));
    }

    #[tokio::test]
    async fn test_output_pipe_transforms_step_output() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let out = executor(temp.path())
            .execute(&step("s", Some("NA"), "b\na", "STDOUT|sort"), "", &mut vars)
            .await
            .unwrap();

        assert_eq!(out, "a\nb\n");
    }

    #[tokio::test]
    async fn test_variable_substitution_in_action() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();
        vars.set("TOPIC", "herons");

        let out = executor(temp.path())
            .execute(&step("s", Some("NA"), "write about $TOPIC", "STDOUT"), "", &mut vars)
            .await
            .unwrap();

        assert_eq!(out, "write about herons");
    }

    #[tokio::test]
    async fn test_cli_template_vars_in_action() {
        let temp = tempdir().unwrap();
        let mut cli_vars = BTreeMap::new();
        cli_vars.insert("audience".to_string(), "beginners".to_string());
        let exec = executor(temp.path()).with_cli_vars(cli_vars);
        let mut vars = VariableMap::new();

        let out = exec
            .execute(&step("s", Some("NA"), "explain for {{ audience }}", "STDOUT"), "", &mut vars)
            .await
            .unwrap();

        assert_eq!(out, "explain for beginners");
    }

    #[tokio::test]
    async fn test_batch_individual_writes_indexed_files() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(temp.path().join("b.txt"), "beta").unwrap();

        let mut step = step("s", None, "act", "out-{{chunk_index}}-of-{{total_chunks}}.txt");
        step.input = Some(StepInput::Many(vec!["a.txt".to_string(), "b.txt".to_string()]));
        step.batch_mode = Some("individual".to_string());

        let mut vars = VariableMap::new();
        executor(temp.path()).execute(&step, "", &mut vars).await.unwrap();

        assert!(temp.path().join("out-1-of-2.txt").exists());
        assert!(temp.path().join("out-2-of-2.txt").exists());
    }

    #[tokio::test]
    async fn test_chunked_input_iterates() {
        let temp = tempdir().unwrap();
        let mut chunked = step("s", Some("abcdefghij"), "act", "STDOUT");
        chunked.chunk = Some(4);

        let client = Arc::new(ScriptedClient::new(vec!["one", "two", "three"]));
        let exec = StepExecutor::new(
            client.clone(),
            ToolExecutor::new(ToolPolicy::default(), temp.path()),
            temp.path(),
        );

        let mut vars = VariableMap::new();
        let out = exec.execute(&chunked, "", &mut vars).await.unwrap();

        // 10 bytes in chunks of 4 -> 3 invocations
        assert_eq!(client.call_count(), 3);
        assert_eq!(out, "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn test_glob_input_expands() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("x.log"), "first").unwrap();
        std::fs::write(temp.path().join("y.log"), "second").unwrap();

        let mut vars = VariableMap::new();
        let out = executor(temp.path())
            .execute(&step("s", Some("*.log"), "act", "STDOUT"), "", &mut vars)
            .await
            .unwrap();

        assert!(out.contains("first"));
        assert!(out.contains("second"));
    }

    #[tokio::test]
    async fn test_unresolved_variable_in_output_template() {
        let temp = tempdir().unwrap();
        let mut vars = VariableMap::new();

        let err = executor(temp.path())
            .execute(&step("s", Some("NA"), "act", "$MISSING/out.txt"), "", &mut vars)
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::UnresolvedVariable { .. }));
        assert!(err.to_string().contains("MISSING"));
    }

    #[tokio::test]
    async fn test_codebase_index_step_is_a_marker() {
        let temp = tempdir().unwrap();
        let mut index = step("index", None, "ignored", "CODEBASE");
        index.step_type = Some("codebase-index".to_string());

        let mut vars = VariableMap::new();
        let out = executor(temp.path()).execute(&index, "prior", &mut vars).await.unwrap();

        assert_eq!(out, "prior");
        assert!(vars.contains("CODEBASE"));
    }

    #[test]
    fn test_split_chunks_boundaries() {
        assert_eq!(split_chunks("abcdef", 10), vec!["abcdef"]);
        assert_eq!(split_chunks("abcdef", 2), vec!["ab", "cd", "ef"]);
        assert_eq!(split_chunks("abcde", 2), vec!["ab", "cd", "e"]);
        // Multi-byte chars never split mid-codepoint
        let chunks = split_chunks("héllo", 2);
        assert_eq!(chunks.concat(), "héllo");
    }

    #[test]
    fn test_looks_like_path() {
        assert!(looks_like_path("data/notes.txt"));
        assert!(looks_like_path("notes.txt"));
        assert!(!looks_like_path("just some words"));
        assert!(!looks_like_path("DONE"));
    }
}
