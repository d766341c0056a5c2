//! Replication state persisted as a JSON file

use crate::error::{Result, TapError};
use crate::sync::ReplicationState;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored state. A missing file is an empty state.
    pub fn load(&self) -> Result<ReplicationState> {
        if !self.path.exists() {
            log::debug!("No state at {}, starting fresh", self.path.display());
            return Ok(ReplicationState::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(ReplicationState::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            TapError::Config(format!("invalid state file {}: {}", self.path.display(), e))
        })
    }

    /// Write `state`, replacing the file atomically through a sibling
    /// temporary file.
    pub fn save(&self, state: &ReplicationState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        fs::write(&temp, serde_json::to_string_pretty(state)?)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}
