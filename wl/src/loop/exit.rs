//! Loop exit condition evaluation

use regex::RegexBuilder;
use tracing::{debug, warn};

use crate::workflow::LoopConfig;

/// Completion phrases recognized under `llm_decides`
const COMPLETION_PATTERNS: &[&str] = &[
    r"^\s*DONE\s*$",
    r"^\s*COMPLETE\s*$",
    r"^\s*FINISHED\s*$",
    r"TASK[_\s-]?COMPLETE",
];

/// Decide whether the loop should exit after an iteration.
///
/// Returns the exit reason when the condition fires. An absent or unknown
/// `exit_condition` never exits; the loop then runs to `max_iterations`.
pub fn evaluate_exit(config: &LoopConfig, output: &str) -> Option<String> {
    match config.exit_condition.as_deref() {
        None | Some("llm_decides") => llm_decides(output),
        Some("pattern_match") => pattern_match(config, output),
        Some(other) => {
            debug!(exit_condition = %other, "unknown exit condition; loop runs to max_iterations");
            None
        }
    }
}

fn llm_decides(output: &str) -> Option<String> {
    let trimmed = output.trim();
    for pattern in COMPLETION_PATTERNS {
        let Ok(re) = RegexBuilder::new(pattern).case_insensitive(true).build() else {
            continue;
        };
        if re.is_match(trimmed) {
            debug!(%pattern, "llm_decides: completion phrase matched");
            return Some("LLM indicated completion".to_string());
        }
    }
    None
}

fn pattern_match(config: &LoopConfig, output: &str) -> Option<String> {
    let pattern = config.exit_pattern.as_deref().unwrap_or("");
    if pattern.is_empty() {
        // An empty pattern never exits by this rule
        return None;
    }

    match regex::Regex::new(pattern) {
        Ok(re) if re.is_match(output) => Some(format!("output matched exit pattern '{}'", pattern)),
        Ok(_) => None,
        Err(e) => {
            warn!(%pattern, error = %e, "invalid exit_pattern; loop runs to max_iterations");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(exit_condition: Option<&str>, exit_pattern: Option<&str>) -> LoopConfig {
        LoopConfig {
            exit_condition: exit_condition.map(String::from),
            exit_pattern: exit_pattern.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_llm_decides_completion_phrases() {
        let c = config(None, None);

        assert!(evaluate_exit(&c, "DONE").is_some());
        assert!(evaluate_exit(&c, "  done  ").is_some());
        assert!(evaluate_exit(&c, "Complete").is_some());
        assert!(evaluate_exit(&c, "FINISHED").is_some());
        assert!(evaluate_exit(&c, "All set. TASK_COMPLETE").is_some());
        assert!(evaluate_exit(&c, "task complete").is_some());
    }

    #[test]
    fn test_llm_decides_rejects_partial_matches() {
        let c = config(Some("llm_decides"), None);

        assert!(evaluate_exit(&c, "not done yet").is_none());
        assert!(evaluate_exit(&c, "working\nDONE maybe later").is_none());
        assert!(evaluate_exit(&c, "still going").is_none());
    }

    #[test]
    fn test_llm_decides_reason() {
        let c = config(None, None);
        assert_eq!(evaluate_exit(&c, "DONE").unwrap(), "LLM indicated completion");
    }

    #[test]
    fn test_pattern_match() {
        let c = config(Some("pattern_match"), Some(r"ship it \d+"));

        assert!(evaluate_exit(&c, "ok, ship it 42").is_some());
        assert!(evaluate_exit(&c, "hold off").is_none());
    }

    #[test]
    fn test_pattern_match_empty_never_exits() {
        let c = config(Some("pattern_match"), Some(""));
        assert!(evaluate_exit(&c, "anything").is_none());

        let c = config(Some("pattern_match"), None);
        assert!(evaluate_exit(&c, "anything").is_none());
    }

    #[test]
    fn test_pattern_match_ignores_llm_phrases() {
        let c = config(Some("pattern_match"), Some("^ship$"));
        assert!(evaluate_exit(&c, "DONE").is_none());
    }

    #[test]
    fn test_unknown_condition_never_exits() {
        let c = config(Some("gut_feeling"), None);
        assert!(evaluate_exit(&c, "DONE").is_none());
    }

    #[test]
    fn test_invalid_pattern_never_exits() {
        let c = config(Some("pattern_match"), Some("(unclosed"));
        assert!(evaluate_exit(&c, "anything").is_none());
    }
}
