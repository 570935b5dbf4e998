//! Loop state store
//!
//! One JSON file per loop under the state directory. Saves go through a
//! sibling temp file and a rename so the live file is never truncated in
//! place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::gates::QualityGateResult;
use crate::r#loop::{LoopContext, LoopStatus};

/// Errors from the loop state store
#[derive(Debug, Error)]
pub enum StateError {
    #[error("no saved state for loop '{0}'")]
    NotFound(String),

    #[error("saved state for loop '{loop_name}' is corrupt: {source}")]
    Corrupt {
        loop_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode state for loop '{loop_name}': {source}")]
    Encode {
        loop_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Snapshot of a loop written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedLoopState {
    pub loop_name: String,
    pub status: LoopStatus,
    pub context: LoopContext,
    /// Workflow file this state was produced from
    pub workflow_file: PathBuf,
    /// Hash of the workflow file bytes at checkpoint time
    pub workflow_checksum: String,
    /// Snapshot of the variable map
    pub variables: BTreeMap<String, String>,
    /// Most recent quality gate results, when any gates ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_gate_results: Option<Vec<QualityGateResult>>,
}

/// Per-loop checkpoint files in a single directory
pub struct LoopStateStore {
    dir: PathBuf,
}

impl LoopStateStore {
    /// Default store location: `~/.workloop/loop-states`.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".workloop")
            .join("loop-states")
    }

    /// Open (creating if needed) a store at the given directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "LoopStateStore::open");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, loop_name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", loop_name))
    }

    /// Atomically persist a loop's state: write a sibling temp file, then
    /// rename over the live file.
    pub fn save(&self, state: &PersistedLoopState) -> Result<(), StateError> {
        let path = self.path_for(&state.loop_name);
        let tmp = self.dir.join(format!(".{}.json.tmp", state.loop_name));

        let json = serde_json::to_string_pretty(state).map_err(|source| StateError::Encode {
            loop_name: state.loop_name.clone(),
            source,
        })?;

        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        info!(
            loop_name = %state.loop_name,
            status = %state.status,
            iteration = state.context.iteration,
            "saved loop state"
        );
        Ok(())
    }

    /// Load a loop's saved state. A missing file is `NotFound`; an
    /// unreadable one is `Corrupt`.
    pub fn load(&self, loop_name: &str) -> Result<PersistedLoopState, StateError> {
        let path = self.path_for(loop_name);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(loop_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|source| StateError::Corrupt {
            loop_name: loop_name.to_string(),
            source,
        })
    }

    /// Remove a loop's saved state, if any.
    pub fn delete(&self, loop_name: &str) -> Result<(), StateError> {
        let path = self.path_for(loop_name);
        if path.exists() {
            fs::remove_file(&path)?;
            info!(%loop_name, "deleted loop state");
        }
        Ok(())
    }

    /// Names of all loops with saved state.
    pub fn list(&self) -> Result<Vec<String>, StateError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Change-detection hash of a workflow file's bytes (not cryptographic).
pub fn workflow_checksum(path: &Path) -> Result<String, StateError> {
    use std::hash::{Hash, Hasher};

    let bytes = fs::read(path)?;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

/// Recompute the workflow hash and compare against a stored value.
pub fn validate_workflow_checksum(path: &Path, expected: &str) -> Result<bool, StateError> {
    Ok(workflow_checksum(path)? == expected)
}
