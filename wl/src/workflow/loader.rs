//! Workflow file loading
//!
//! Turns the raw YAML document into the in-memory `Workflow`. Top-level
//! keys are step names unless reserved; `loops`, `defer`, and
//! `agentic-loop` carry nested structures. Structural authoring mistakes
//! are the validator's job; the loader only fails on YAML it cannot shape
//! into the model at all.

use std::path::Path;

use eyre::{Context, Result, eyre};
use serde_yaml::Value;
use tracing::{debug, info};

use super::{LoopConfig, Step, Workflow};

/// Read and parse a workflow file into the raw YAML document.
///
/// Duplicate mapping keys (including within `defer`) are rejected by the
/// parser and surface here as a config error.
pub fn load_value(path: &Path) -> Result<Value> {
    let content =
        std::fs::read_to_string(path).context(format!("failed to read workflow file {}", path.display()))?;
    let value: Value =
        serde_yaml::from_str(&content).context(format!("failed to parse workflow file {}", path.display()))?;
    debug!(path = %path.display(), "load_value: parsed workflow file");
    Ok(value)
}

impl Workflow {
    /// Load a workflow file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = load_value(path)?;
        let workflow = Self::from_value(path, raw)?;
        info!(
            path = %path.display(),
            steps = workflow.steps.len(),
            loops = workflow.loops.len(),
            "loaded workflow"
        );
        Ok(workflow)
    }

    /// Build a workflow from an already-parsed document.
    pub fn from_value(path: &Path, raw: Value) -> Result<Self> {
        let mapping = raw
            .as_mapping()
            .ok_or_else(|| eyre!("workflow root must be a mapping of step names"))?;

        let mut steps = Vec::new();
        let mut defer = Vec::new();
        let mut loops = Vec::new();
        let mut execute_loops = Vec::new();
        let mut agentic_loop = None;

        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                return Err(eyre!("workflow keys must be strings, got {:?}", key));
            };

            match key {
                "defer" => {
                    defer = steps_from_value(value).context("invalid 'defer' block")?;
                }
                "loops" => {
                    loops = loops_from_value(value)?;
                }
                "execute_loops" => {
                    execute_loops = serde_yaml::from_value(value.clone())
                        .context("'execute_loops' must be a list of loop names")?;
                }
                "agentic-loop" => {
                    agentic_loop = Some(agentic_loop_from_value(value)?);
                }
                name => {
                    let mut step: Step = serde_yaml::from_value(value.clone())
                        .context(format!("invalid step '{}'", name))?;
                    step.name = name.to_string();
                    steps.push(step);
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            steps,
            defer,
            loops,
            execute_loops,
            agentic_loop,
            raw,
        })
    }
}

/// Parse a `loops` block: a mapping of loop name to loop config.
fn loops_from_value(value: &Value) -> Result<Vec<LoopConfig>> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| eyre!("'loops' must be a mapping of loop names"))?;

    let mut loops = Vec::new();
    for (key, value) in mapping {
        let Some(name) = key.as_str() else {
            return Err(eyre!("loop names must be strings, got {:?}", key));
        };
        let mut config: LoopConfig =
            serde_yaml::from_value(value.clone()).context(format!("invalid loop '{}'", name))?;
        config.name = name.to_string();
        loops.push(config);
    }
    Ok(loops)
}

/// Parse a top-level `agentic-loop` block, which wraps its settings in a
/// `config` child alongside an optional `steps` sibling.
fn agentic_loop_from_value(value: &Value) -> Result<LoopConfig> {
    if !value.is_mapping() {
        return Err(eyre!("'agentic-loop' must be a mapping"));
    }

    let config_value = value
        .get("config")
        .ok_or_else(|| eyre!("'agentic-loop' requires a 'config' child"))?;

    let mut config: LoopConfig =
        serde_yaml::from_value(config_value.clone()).context("invalid 'agentic-loop' config")?;
    config.name = "agentic-loop".to_string();

    if config.steps.is_empty()
        && let Some(steps_value) = value.get("steps")
    {
        config.steps = steps_from_value(steps_value).context("invalid 'agentic-loop' steps")?;
    }

    Ok(config)
}

/// Parse a steps block into ordered steps.
///
/// Accepts a mapping (name -> step config, authored order preserved) or a
/// sequence of mappings that each carry a `name` field or a single
/// name-to-config entry.
pub fn steps_from_value(value: &Value) -> Result<Vec<Step>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Mapping(mapping) => {
            let mut steps = Vec::new();
            for (key, value) in mapping {
                let Some(name) = key.as_str() else {
                    return Err(eyre!("step names must be strings, got {:?}", key));
                };
                let mut step: Step =
                    serde_yaml::from_value(value.clone()).context(format!("invalid step '{}'", name))?;
                step.name = name.to_string();
                steps.push(step);
            }
            Ok(steps)
        }
        Value::Sequence(items) => {
            let mut steps = Vec::new();
            for item in items {
                let Some(mapping) = item.as_mapping() else {
                    return Err(eyre!("step entries must be mappings, got {:?}", item));
                };

                // Single-key entry: `- name: {config}`
                if mapping.len() == 1 {
                    let (key, value) = mapping.iter().next().ok_or_else(|| eyre!("empty step entry"))?;
                    if let (Some(name), Some(_)) = (key.as_str(), value.as_mapping()) {
                        let mut step: Step =
                            serde_yaml::from_value(value.clone()).context(format!("invalid step '{}'", name))?;
                        step.name = name.to_string();
                        steps.push(step);
                        continue;
                    }
                }

                // Full entry with an explicit `name` field
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| eyre!("step entry is missing a 'name' field"))?
                    .to_string();
                let mut step: Step =
                    serde_yaml::from_value(item.clone()).context(format!("invalid step '{}'", name))?;
                step.name = name;
                steps.push(step);
            }
            Ok(steps)
        }
        other => Err(eyre!("steps must be a mapping or a sequence, got {:?}", other)),
    }
}

/// serde adapter so `LoopConfig.steps` accepts either steps form.
pub(crate) fn de_steps<'de, D>(deserializer: D) -> Result<Vec<Step>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let value = Value::deserialize(deserializer)?;
    steps_from_value(&value).map_err(serde::de::Error::custom)
}
