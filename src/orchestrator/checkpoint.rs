//! Durable checkpoint storage for [`ExecutionState`].
//!
//! Writes go to a sibling temporary file in the same directory which is then
//! renamed over the canonical path, so a reader never observes a partial
//! document. There is no fallback location: a missing state directory is an
//! error, because silently writing elsewhere would break resumability.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::state::ExecutionState;
use crate::error::StateError;

/// File name of the checkpoint inside the invoking user's home directory.
pub const STATE_FILE_NAME: &str = ".stagehand_state.json";

/// Loads and saves the single execution-state document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    /// Canonical location: `~/.stagehand_state.json`.
    pub fn default_path() -> Result<PathBuf, StateError> {
        let home = dirs::home_dir().ok_or_else(|| {
            StateError::DirectoryMissing(PathBuf::from("$HOME"))
        })?;
        Ok(home.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Fail early when the containing directory is missing.
    pub fn ensure_directory(&self) -> Result<(), StateError> {
        let dir = self.parent_dir();
        if dir.is_dir() {
            Ok(())
        } else {
            Err(StateError::DirectoryMissing(dir))
        }
    }

    /// Atomically replace the checkpoint with `state`.
    pub fn save(&self, state: &ExecutionState) -> Result<(), StateError> {
        self.ensure_directory()?;
        let dir = self.parent_dir();

        let json = serde_json::to_vec_pretty(state)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // The document carries credentials
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::IoError(e.error))?;

        log::info!(
            "[Checkpoint] ✓ Saved phase {} ({}) to {}",
            state.phase,
            state.phase_name,
            self.path.display()
        );
        Ok(())
    }

    /// Read the checkpoint, or `None` when no run has completed a phase yet.
    pub fn load(&self) -> Result<Option<ExecutionState>, StateError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::IoError(e)),
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Remove the checkpoint. Returns whether a document existed.
    pub fn clear(&self) -> Result<bool, StateError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("[Checkpoint] Cleared {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::IoError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_config;
    use crate::orchestrator::state::PhaseId;
    use tempfile::TempDir;

    #[test]
    fn test_load_absent_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));
        let state = ExecutionState::new(PhaseId::new(3), "Prepare install directory", sample_config());

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_save_overwrites_previous_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));

        store
            .save(&ExecutionState::new(PhaseId::new(1), "one", sample_config()))
            .unwrap();
        store
            .save(&ExecutionState::new(PhaseId::sub(5, 5), "five and a half", sample_config()))
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.phase, PhaseId::sub(5, 5));
        // Only the canonical file remains; temp siblings were renamed away
        let entries: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("does-not-exist");
        let store = StateStore::new(missing.join("state.json"));

        let err = store
            .save(&ExecutionState::new(PhaseId::new(1), "one", sample_config()))
            .unwrap_err();
        assert!(matches!(err, StateError::DirectoryMissing(ref p) if p == &missing));
        assert!(!missing.exists(), "no fallback directory may be created");
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, b"{ \"phase\": 3, ").unwrap();

        let store = StateStore::new(&path);
        assert!(matches!(store.load(), Err(StateError::Corrupt { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_document_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));
        store
            .save(&ExecutionState::new(PhaseId::new(1), "one", sample_config()))
            .unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));
        assert!(!store.clear().unwrap());
        store
            .save(&ExecutionState::new(PhaseId::new(1), "one", sample_config()))
            .unwrap();
        assert!(store.clear().unwrap());
        assert!(store.load().unwrap().is_none());
    }
}
