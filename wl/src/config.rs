//! Engine configuration types and loading

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tools::{DEFAULT_ALLOW, DEFAULT_DENY, DEFAULT_TOOL_TIMEOUT_SECS};

/// Environment variable gating loops that declare `allowed_paths`
pub const ALLOW_AGENTIC_TOOLS_ENV: &str = "WORKLOOP_ALLOW_AGENTIC_TOOLS";

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider settings
    pub provider: ProviderConfig,

    /// Tool policy settings
    pub tools: ToolsConfig,

    /// Loop state storage settings
    pub state: StateConfig,

    /// Emit per-iteration traces
    pub debug: bool,
}

impl Config {
    /// Load configuration with a fallback chain: explicit path, then
    /// project-local `.workloop.yml`, then the user config directory,
    /// then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".workloop.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("workloop").join("workloop.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name passed to the client factory
    pub name: String,

    /// Default model hint for steps that do not set one
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "echo".to_string(),
            model: "default".to_string(),
        }
    }
}

/// Tool policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Commands permitted to run
    pub allow: Vec<String>,

    /// Commands refused regardless of the allowlist
    pub deny: Vec<String>,

    /// Per-invocation timeout in seconds
    #[serde(rename = "timeout-seconds")]
    pub timeout_seconds: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow: DEFAULT_ALLOW.iter().map(|s| s.to_string()).collect(),
            deny: DEFAULT_DENY.iter().map(|s| s.to_string()).collect(),
            timeout_seconds: DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }
}

/// Loop state storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Override for the loop-state directory; defaults to
    /// `~/.workloop/loop-states` when unset
    pub dir: Option<PathBuf>,
}

/// Whether loops that declare `allowed_paths` may start.
///
/// Controlled by `WORKLOOP_ALLOW_AGENTIC_TOOLS`; unset means allowed.
pub fn agentic_tools_allowed() -> bool {
    match std::env::var(ALLOW_AGENTIC_TOOLS_ENV) {
        Ok(value) => !matches!(value.to_lowercase().as_str(), "0" | "false" | "no" | "off"),
        Err(_) => true,
    }
}
