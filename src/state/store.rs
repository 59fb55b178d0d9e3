use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use super::{AutopilotState, SafeId, StateUpdate};
use crate::errors::StateError;

/// File-backed state records, one JSON file per identifier.
///
/// Every mutation is a read-merge-write performed under an exclusive advisory
/// lock on `.<identifier>.lock`; the write lands in a temp file in the same
/// directory and is renamed over the record.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, identifier: &SafeId) -> PathBuf {
        self.dir.join(format!("{identifier}.json"))
    }

    fn lock_path(&self, identifier: &SafeId) -> PathBuf {
        self.dir.join(format!(".{identifier}.lock"))
    }

    /// Read the record without taking the lock. `Ok(None)` when absent.
    pub fn load(&self, identifier: &SafeId) -> Result<Option<AutopilotState>, StateError> {
        let path = self.path_for(identifier);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Read { path, source }),
        };
        let state: AutopilotState = serde_json::from_str(&raw).map_err(|source| {
            StateError::Schema {
                path: path.clone(),
                source,
            }
        })?;
        if &state.identifier != identifier {
            return Err(StateError::IdentifierMismatch {
                path,
                found: state.identifier.to_string(),
                expected: identifier.to_string(),
            });
        }
        Ok(Some(state))
    }

    /// Merge `update` into the record, creating it when absent.
    pub fn merge(
        &self,
        identifier: &SafeId,
        update: StateUpdate,
        now: DateTime<Utc>,
    ) -> Result<AutopilotState, StateError> {
        fs::create_dir_all(&self.dir).map_err(|source| StateError::Write {
            path: self.dir.clone(),
            source,
        })?;

        let _guard = RecordLock::acquire(&self.lock_path(identifier))?;

        let mut state = self
            .load(identifier)?
            .unwrap_or_else(|| AutopilotState::new(identifier.clone(), now));
        state.merge(update, now);
        self.write_atomic(identifier, &state)?;

        tracing::debug!(
            identifier = %identifier,
            steps = state.completed_steps.len(),
            "state merged"
        );
        Ok(state)
    }

    fn write_atomic(&self, identifier: &SafeId, state: &AutopilotState) -> Result<(), StateError> {
        let path = self.path_for(identifier);
        let write_err = |source| StateError::Write {
            path: path.clone(),
            source,
        };

        let mut json = serde_json::to_string_pretty(state).map_err(|source| StateError::Schema {
            path: path.clone(),
            source,
        })?;
        json.push('\n');

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

/// Holds the exclusive lock until dropped.
struct RecordLock {
    file: File,
}

impl RecordLock {
    fn acquire(path: &Path) -> Result<Self, StateError> {
        let lock_err = |source| StateError::Lock {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(lock_err)?;
        fs2::FileExt::lock_exclusive(&file).map_err(lock_err)?;
        Ok(Self { file })
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
