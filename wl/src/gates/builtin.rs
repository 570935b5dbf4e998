//! Gate variants and their checks

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::workflow::QualityGateConfig;

use super::GateFailure;

/// Directories never scanned by the syntax and security gates
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".workloop"];

/// Per-language syntax checks: extension, language label, command template
/// with `{}` standing for the file path. Languages with no matching files
/// are skipped.
const LANGUAGE_CHECKS: &[(&str, &str, &str)] = &[
    ("py", "python", "python3 -m py_compile {}"),
    ("js", "javascript", "node --check {}"),
    ("sh", "shell", "sh -n {}"),
];

/// Security scan patterns: label and regex
const SECURITY_PATTERNS: &[(&str, &str)] = &[
    (
        "hardcoded credential",
        r#"(?i)(password|passwd|secret|api[_-]?key|token)\s*=\s*["'][^"']{4,}["']"#,
    ),
    ("private key material", r"-----BEGIN [A-Z ]*PRIVATE KEY-----"),
    ("eval call", r"\beval\s*\("),
    ("exec call", r"\bexec\s*\("),
    (
        "sql string concatenation",
        r#"(?i)["'][^"']*\b(select|insert|update|delete)\b[^"']*["']\s*\+"#,
    ),
];

/// Summary lines recognized in test-runner output
const TEST_SUMMARY_PATTERNS: &[&str] = &[
    r"test result: (ok|FAILED)\..*",
    r"=+ .*\d+ (passed|failed).* =+",
    r"(?m)^(ok|FAIL)\s+\S+.*",
    r"Tests?:\s+.*",
];

/// Outcome of a single gate attempt
#[derive(Debug, Clone)]
pub struct GateCheck {
    pub passed: bool,
    pub message: String,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl GateCheck {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }
}

/// A quality gate, chosen by the config's `type` field
#[derive(Debug, Clone)]
pub enum Gate {
    /// Runs a shell command; passes iff it exits 0
    Command { command: String },
    /// Per-language syntax checks over the working directory
    Syntax,
    /// Regex scan for secrets and injection-prone patterns
    Security,
    /// Runs a test command and extracts a runner summary line
    Test { command: String },
}

impl Gate {
    /// Construct the gate variant for a config. Unknown types and command
    /// gates without a command are rejected.
    pub fn from_config(config: &QualityGateConfig) -> Result<Self, GateFailure> {
        match config.gate_type.as_str() {
            "" | "command" => {
                if config.command.is_empty() {
                    return Err(GateFailure {
                        gate: config.name.clone(),
                        attempts: 0,
                        message: "command gate has no command configured".to_string(),
                    });
                }
                Ok(Gate::Command {
                    command: config.command.clone(),
                })
            }
            "syntax" => Ok(Gate::Syntax),
            "security" => Ok(Gate::Security),
            "test" => {
                if config.command.is_empty() {
                    return Err(GateFailure {
                        gate: config.name.clone(),
                        attempts: 0,
                        message: "test gate has no command configured".to_string(),
                    });
                }
                Ok(Gate::Test {
                    command: config.command.clone(),
                })
            }
            other => Err(GateFailure {
                gate: config.name.clone(),
                attempts: 0,
                message: format!("unknown quality gate type '{}'", other),
            }),
        }
    }

    /// Run one attempt of the gate in the working directory.
    ///
    /// Execution problems (spawn failures, timeouts) are reported as failed
    /// checks so the retry budget applies to them.
    pub async fn check(&self, work_dir: &Path, timeout: Duration) -> GateCheck {
        match self {
            Gate::Command { command } => check_command(command, work_dir, timeout).await,
            Gate::Syntax => check_syntax(work_dir, timeout).await,
            Gate::Security => check_security(work_dir),
            Gate::Test { command } => check_test(command, work_dir, timeout).await,
        }
    }
}

/// Run a shell command and shape the exit status into a check.
async fn run_command(command: &str, work_dir: &Path, timeout: Duration) -> GateCheck {
    debug!(%command, work_dir = %work_dir.display(), "gate: running command");

    let output = tokio::time::timeout(
        timeout,
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(work_dir)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();

            let mut check = if exit_code == 0 {
                GateCheck::pass("command exited with code 0")
            } else {
                let detail = if !stderr.trim().is_empty() { stderr.trim() } else { stdout.trim() };
                GateCheck::fail(format!("command exited with code {}: {}", exit_code, truncate(detail, 500)))
            };
            check.details.insert("exit_code".to_string(), serde_json::json!(exit_code));
            check.details.insert("stdout".to_string(), serde_json::json!(truncate(&stdout, 2000)));
            check.details.insert("stderr".to_string(), serde_json::json!(truncate(&stderr, 2000)));
            check
        }
        Ok(Err(e)) => GateCheck::fail(format!("failed to execute command: {}", e)),
        Err(_) => GateCheck::fail(format!("command timed out after {}s", timeout.as_secs())),
    }
}

async fn check_command(command: &str, work_dir: &Path, timeout: Duration) -> GateCheck {
    run_command(command, work_dir, timeout).await
}

/// Check syntax for every language with files under the working directory.
async fn check_syntax(work_dir: &Path, timeout: Duration) -> GateCheck {
    let mut details = BTreeMap::new();
    let mut failures = Vec::new();
    let mut checked_languages = 0usize;

    for (ext, language, template) in LANGUAGE_CHECKS {
        let files = collect_files(work_dir, ext);
        if files.is_empty() {
            debug!(language, "syntax gate: no files, skipping language");
            continue;
        }
        checked_languages += 1;

        let mut language_failures = Vec::new();
        for file in &files {
            let command = template.replace("{}", &shell_quote(file));
            let check = run_command(&command, work_dir, timeout).await;
            if !check.passed {
                language_failures.push(format!("{}: {}", file, check.message));
            }
        }

        details.insert(
            format!("{}_files", language),
            serde_json::json!(files.len()),
        );
        if !language_failures.is_empty() {
            details.insert(format!("{}_failures", language), serde_json::json!(language_failures));
            failures.push(format!("{} ({} file(s))", language, language_failures.len()));
        }
    }

    let mut check = if failures.is_empty() {
        GateCheck::pass(format!("syntax clean across {} language(s)", checked_languages))
    } else {
        GateCheck::fail(format!("syntax errors in {}", failures.join(", ")))
    };
    check.details.extend(details);
    check
}

/// Scan the working directory for risky patterns.
fn check_security(work_dir: &Path) -> GateCheck {
    let patterns: Vec<(&str, Regex)> = SECURITY_PATTERNS
        .iter()
        .filter_map(|(label, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*label, re)),
            Err(e) => {
                warn!(%label, error = %e, "security gate: bad pattern, skipping");
                None
            }
        })
        .collect();

    let mut findings = Vec::new();

    for entry in WalkDir::new(work_dir)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        // Binary and oversized files are not worth scanning
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if content.len() > 1_000_000 {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(work_dir)
            .unwrap_or(entry.path())
            .display()
            .to_string();

        for (line_number, line) in content.lines().enumerate() {
            for (label, re) in &patterns {
                if re.is_match(line) {
                    findings.push(serde_json::json!({
                        "file": relative,
                        "line": line_number + 1,
                        "pattern": label,
                    }));
                }
            }
        }
    }

    if findings.is_empty() {
        GateCheck::pass("no security findings")
    } else {
        let mut check = GateCheck::fail(format!("{} security finding(s)", findings.len()));
        check.details.insert("findings".to_string(), serde_json::json!(findings));
        check
    }
}

/// Run the test command and pull out a recognizable summary line.
async fn check_test(command: &str, work_dir: &Path, timeout: Duration) -> GateCheck {
    let mut check = run_command(command, work_dir, timeout).await;

    let stdout = check
        .details
        .get("stdout")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let stderr = check
        .details
        .get("stderr")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let combined = format!("{}\n{}", stdout, stderr);

    if let Some(summary) = extract_test_summary(&combined) {
        check.details.insert("summary".to_string(), serde_json::json!(summary.clone()));
        if check.passed {
            check.message = summary;
        }
    }
    check
}

/// First line matching a known test-runner summary shape.
fn extract_test_summary(output: &str) -> Option<String> {
    for pattern in TEST_SUMMARY_PATTERNS {
        let Ok(re) = Regex::new(pattern) else { continue };
        if let Some(m) = re.find(output) {
            return Some(m.as_str().trim().to_string());
        }
    }
    None
}

fn collect_files(work_dir: &Path, extension: &str) -> Vec<String> {
    WalkDir::new(work_dir)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|x| x == extension).unwrap_or(false))
        .filter_map(|e| {
            e.path()
                .strip_prefix(work_dir)
                .ok()
                .map(|p| p.display().to_string())
        })
        .collect()
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}
