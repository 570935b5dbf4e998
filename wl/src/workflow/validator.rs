//! Static workflow validation
//!
//! Runs once, before execution, over the raw YAML document. Each finding
//! carries a message and a concrete fix; warnings (like ignored top-level
//! steps) do not make the workflow invalid. The validator is a pure
//! function of its input.

use regex::Regex;
use serde_yaml::Value;
use tracing::debug;

use crate::vars::is_variable_name;

use super::RESERVED_KEYS;

/// Exit conditions a loop block may declare
const ALLOWED_EXIT_CONDITIONS: &[&str] = &["llm_decides", "pattern_match"];

/// A single validation finding
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    /// Source line, when the parser can attribute one
    pub line: Option<usize>,
    /// Dotted path to the offending field
    pub field: Option<String>,
    pub message: String,
    /// Concrete suggestion for repairing the workflow
    pub fix: String,
    /// Warnings do not make the workflow invalid
    pub warning: bool,
}

/// Outcome of validating a workflow document
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn push_error(&mut self, field: Option<String>, message: impl Into<String>, fix: impl Into<String>) {
        self.errors.push(ValidationIssue {
            line: None,
            field,
            message: message.into(),
            fix: fix.into(),
            warning: false,
        });
    }

    fn push_warning(&mut self, field: Option<String>, message: impl Into<String>, fix: impl Into<String>) {
        self.errors.push(ValidationIssue {
            line: None,
            field,
            message: message.into(),
            fix: fix.into(),
            warning: true,
        });
    }

    fn finish(mut self) -> Self {
        self.valid = self.errors.iter().all(|e| e.warning);
        self
    }
}

/// Validate a workflow document before execution.
pub fn validate_workflow(raw: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(mapping) = raw.as_mapping() else {
        result.push_error(
            None,
            "workflow root must be a mapping of step names",
            "start the file with `step-name:` entries, not a list or scalar",
        );
        return result.finish();
    };

    // Ordered (name, value) pairs for top-level steps
    let step_entries: Vec<(&str, &Value)> = mapping
        .iter()
        .filter_map(|(k, v)| k.as_str().map(|name| (name, v)))
        .filter(|(name, _)| !RESERVED_KEYS.contains(name))
        .collect();

    let loop_names: Vec<&str> = raw
        .get("loops")
        .and_then(Value::as_mapping)
        .map(|m| m.iter().filter_map(|(k, _)| k.as_str()).collect())
        .unwrap_or_default();

    for (name, value) in &step_entries {
        check_step(&mut result, name, value, name);
    }

    check_defer(&mut result, raw);
    check_loops(&mut result, raw, &loop_names);
    check_execute_loops(&mut result, raw, &loop_names);
    check_top_level_agentic_loop(&mut result, raw);
    check_variable_references(&mut result, &step_entries);
    check_ignored_steps(&mut result, raw, &step_entries);

    debug!(findings = result.errors.len(), "validate_workflow: complete");
    result.finish()
}

fn check_step(result: &mut ValidationResult, name: &str, value: &Value, path: &str) {
    if value.is_sequence() {
        result.push_error(
            Some(path.to_string()),
            format!("step '{}' is written as a list of single-key maps (leading hyphens)", name),
            "remove the leading hyphens: step fields must be keys of the step mapping, not list items",
        );
        return;
    }
    if !value.is_mapping() {
        result.push_error(
            Some(path.to_string()),
            format!("step '{}' must be a mapping of step fields", name),
            "give the step `action`, `output`, and `input` fields",
        );
        return;
    }

    let generate = value.get("generate");

    if let Some(generate) = generate {
        // The generate sub-block carries its own action/output
        for field in ["action", "output"] {
            if generate.get(field).and_then(Value::as_str).is_none() {
                result.push_error(
                    Some(format!("{}.generate.{}", path, field)),
                    format!("step '{}': 'generate' block is missing '{}'", name, field),
                    format!("add '{}' inside the generate block", field),
                );
            }
        }
        for field in ["action", "output"] {
            if value.get(field).is_some() {
                result.push_error(
                    Some(format!("{}.{}", path, field)),
                    format!(
                        "step '{}': '{}' belongs inside the 'generate' block, not at the step's top level",
                        name, field
                    ),
                    format!("move '{}' into the generate block", field),
                );
            }
        }
    } else {
        let is_index_step = value.get("codebase_index").is_some()
            || value.get("type").and_then(Value::as_str) == Some("codebase-index");

        for field in ["action", "output"] {
            if value.get(field).is_none() {
                result.push_error(
                    Some(format!("{}.{}", path, field)),
                    format!("step '{}' is missing required field '{}'", name, field),
                    format!("add '{}' to the step", field),
                );
            }
        }
        if !is_index_step && value.get("input").is_none() {
            result.push_error(
                Some(format!("{}.input", path)),
                format!("step '{}' is missing required field 'input'", name),
                "add 'input' to the step, or 'input: NA' when the step takes none",
            );
        }
    }

    if let Some(agentic) = value.get("agentic_loop") {
        check_loop_block(result, name, agentic, &format!("{}.agentic_loop", path));
    }
}

fn check_loop_block(result: &mut ValidationResult, name: &str, value: &Value, path: &str) {
    let exit_condition = value.get("exit_condition").and_then(Value::as_str);

    if let Some(condition) = exit_condition
        && !ALLOWED_EXIT_CONDITIONS.contains(&condition)
    {
        result.push_error(
            Some(format!("{}.exit_condition", path)),
            format!("loop '{}': unknown exit_condition '{}'", name, condition),
            format!("use one of: {}", ALLOWED_EXIT_CONDITIONS.join(", ")),
        );
    }

    if exit_condition == Some("pattern_match") {
        let pattern = value.get("exit_pattern").and_then(Value::as_str).unwrap_or("");
        if pattern.is_empty() {
            result.push_error(
                Some(format!("{}.exit_pattern", path)),
                format!("loop '{}': exit_condition 'pattern_match' requires a non-empty 'exit_pattern'", name),
                "add an 'exit_pattern' regex to the loop",
            );
        }
    }
}

fn check_defer(result: &mut ValidationResult, raw: &Value) {
    let Some(defer) = raw.get("defer") else { return };

    let Some(mapping) = defer.as_mapping() else {
        result.push_error(
            Some("defer".to_string()),
            "'defer' must be a mapping of deferred step names",
            "key each deferred step by name under 'defer'",
        );
        return;
    };

    for (key, value) in mapping {
        if let Some(name) = key.as_str() {
            check_step(result, name, value, &format!("defer.{}", name));
        }
    }
}

fn check_loops(result: &mut ValidationResult, raw: &Value, loop_names: &[&str]) {
    let Some(loops) = raw.get("loops") else { return };

    let Some(mapping) = loops.as_mapping() else {
        result.push_error(
            Some("loops".to_string()),
            "'loops' must be a mapping of loop names",
            "key each loop by name under 'loops'",
        );
        return;
    };

    for (key, value) in mapping {
        let Some(name) = key.as_str() else { continue };
        let path = format!("loops.{}", name);

        if !value.is_mapping() {
            result.push_error(
                Some(path),
                format!("loop '{}' must be a mapping of loop settings", name),
                "give the loop a 'steps' block",
            );
            continue;
        }

        check_loop_block(result, name, value, &path);

        let has_steps = value
            .get("steps")
            .map(|s| match s {
                Value::Mapping(m) => !m.is_empty(),
                Value::Sequence(seq) => !seq.is_empty(),
                _ => false,
            })
            .unwrap_or(false);
        if !has_steps {
            result.push_error(
                Some(format!("{}.steps", path)),
                format!("agentic loop '{}' has no steps defined", name),
                "add at least one step to the loop",
            );
        }

        if let Some(deps) = value.get("depends_on").and_then(Value::as_sequence) {
            for dep in deps {
                let Some(dep) = dep.as_str() else { continue };
                if !loop_names.contains(&dep) {
                    result.push_error(
                        Some(format!("{}.depends_on", path)),
                        format!("loop '{}' depends on unknown loop '{}'", name, dep),
                        format!("define loop '{}' under 'loops' or remove the dependency", dep),
                    );
                }
            }
        }
    }
}

fn check_execute_loops(result: &mut ValidationResult, raw: &Value, loop_names: &[&str]) {
    let Some(execute) = raw.get("execute_loops") else { return };

    let Some(entries) = execute.as_sequence() else {
        result.push_error(
            Some("execute_loops".to_string()),
            "'execute_loops' must be a list of loop names",
            "write 'execute_loops' as a YAML sequence",
        );
        return;
    };

    for entry in entries {
        let Some(name) = entry.as_str() else { continue };
        if !loop_names.contains(&name) {
            result.push_error(
                Some("execute_loops".to_string()),
                format!("execute_loops references unknown loop '{}'", name),
                format!("define loop '{}' under 'loops'", name),
            );
        }
    }
}

fn check_top_level_agentic_loop(result: &mut ValidationResult, raw: &Value) {
    let Some(agentic) = raw.get("agentic-loop") else { return };

    let Some(config) = agentic.get("config") else {
        result.push_error(
            Some("agentic-loop.config".to_string()),
            "top-level 'agentic-loop' requires a 'config' child",
            "nest the loop settings under 'agentic-loop.config'",
        );
        return;
    };

    check_loop_block(result, "agentic-loop", config, "agentic-loop.config");
}

/// Check that every `$NAME` reference is exported by a prior step.
fn check_variable_references(result: &mut ValidationResult, steps: &[(&str, &Value)]) {
    let Ok(token) = Regex::new(r"\$([A-Z][A-Z0-9_]*)") else {
        return;
    };
    let mut exported: Vec<String> = Vec::new();

    for (name, value) in steps {
        for field in ["input", "action"] {
            for text in string_values(value.get(field)) {
                // Tool directive commands are substituted at runtime; shell
                // text like awk's $NF would read as a false reference here.
                if text.trim_start().starts_with("tool:") || text.trim_start().starts_with("STDIN|") {
                    continue;
                }
                for capture in token.captures_iter(text) {
                    let var = &capture[1];
                    if !exported.iter().any(|e| e == var) {
                        result.push_error(
                            Some(format!("{}.{}", name, field)),
                            format!("step '{}' references ${} before any step exports it", name, var),
                            format!("add an earlier step whose output is {}", var),
                        );
                    }
                }
            }
        }

        if let Some(output) = value.get("output").and_then(Value::as_str)
            && is_variable_name(output)
        {
            exported.push(output.to_string());
        }
    }
}

fn check_ignored_steps(result: &mut ValidationResult, raw: &Value, steps: &[(&str, &Value)]) {
    let has_execute_loops = raw
        .get("execute_loops")
        .and_then(Value::as_sequence)
        .map(|s| !s.is_empty())
        .unwrap_or(false);

    if !has_execute_loops {
        return;
    }

    for (name, _) in steps {
        result.push_warning(
            Some(name.to_string()),
            format!("IGNORED: top-level step '{}' is not executed when 'execute_loops' is present", name),
            "move the step inside a loop, or remove 'execute_loops'",
        );
    }
}

/// Collect the string values of a field that may be a scalar or a list.
fn string_values(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Sequence(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}
