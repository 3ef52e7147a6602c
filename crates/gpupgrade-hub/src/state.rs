//! On-disk step bookkeeping in the state directory.
//!
//! Layout:
//! - `step.running`: present while a step runs; holds [`RunningMarker`].
//!   Created with `create_new`, so it doubles as the mutual-exclusion token.
//! - `<step>.status`: the last [`StepOutcome`] of each step that finished.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HubError;

pub const RUNNING_MARKER: &str = "step.running";
const OUTCOME_EXTENSION: &str = "status";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningMarker {
    pub step: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Complete,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub run_id: Uuid,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct StepStore {
    dir: PathBuf,
}

impl StepStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn running_marker_path(&self) -> PathBuf {
        self.dir.join(RUNNING_MARKER)
    }

    pub fn outcome_path(&self, step: &str) -> PathBuf {
        self.dir.join(format!("{step}.{OUTCOME_EXTENSION}"))
    }

    /// Take the running marker for `step`. Fails without touching anything
    /// if another step holds it.
    pub fn acquire(&self, step: &str) -> Result<RunningMarker, HubError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| HubError::io(format!("create state directory {}", self.dir.display()), e))?;

        let path = self.running_marker_path();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let running = match self.running() {
                    Ok(Some(marker)) => marker.step,
                    _ => "unknown".to_string(),
                };
                return Err(HubError::StepAlreadyInProgress {
                    running,
                    state_dir: self.dir.clone(),
                });
            }
            Err(e) => return Err(HubError::io("create running marker", e)),
        };

        let marker = RunningMarker {
            step: step.to_string(),
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
        };
        let written = serde_json::to_vec(&marker)
            .map_err(io::Error::from)
            .and_then(|bytes| file.write_all(&bytes))
            .and_then(|()| file.sync_all());
        if let Err(e) = written {
            let _ = std::fs::remove_file(&path);
            return Err(HubError::io("write running marker", e));
        }
        Ok(marker)
    }

    pub fn running(&self) -> Result<Option<RunningMarker>, HubError> {
        read_json(&self.running_marker_path())
    }

    pub fn outcome(&self, step: &str) -> Result<Option<StepOutcome>, HubError> {
        read_json(&self.outcome_path(step))
    }

    /// Persist `outcome` atomically (temp file, then rename).
    pub fn record(&self, outcome: &StepOutcome) -> io::Result<()> {
        let path = self.outcome_path(&outcome.step);
        let tmp = path.with_extension(format!("{OUTCOME_EXTENSION}.tmp"));
        let bytes = serde_json::to_vec_pretty(outcome)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })
    }

    /// Drop the running marker. Missing is fine.
    pub fn release(&self) -> io::Result<()> {
        match std::fs::remove_file(self.running_marker_path()) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, HubError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HubError::io(format!("read {}", path.display()), e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| HubError::io(format!("parse {}", path.display()), e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(step: &str, outcome: Outcome) -> StepOutcome {
        StepOutcome {
            step: step.into(),
            run_id: Uuid::now_v7(),
            outcome,
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn acquire_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = StepStore::new(dir.path());

        let marker = store.acquire("revert").unwrap();
        assert_eq!(marker.step, "revert");
        assert_eq!(store.running().unwrap(), Some(marker));
    }

    #[test]
    fn acquire_creates_missing_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = StepStore::new(dir.path().join("nested/state"));
        store.acquire("initialize").unwrap();
        assert!(store.running_marker_path().exists());
    }

    #[test]
    fn second_acquire_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StepStore::new(dir.path());
        store.acquire("initialize").unwrap();

        let err = store.acquire("revert").unwrap_err();
        match err {
            HubError::StepAlreadyInProgress { running, .. } => assert_eq!(running, "initialize"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unreadable_marker_still_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = StepStore::new(dir.path());
        std::fs::write(store.running_marker_path(), b"not json").unwrap();

        let err = store.acquire("revert").unwrap_err();
        assert!(matches!(
            err,
            HubError::StepAlreadyInProgress { ref running, .. } if running == "unknown"
        ));
        assert_eq!(std::fs::read(store.running_marker_path()).unwrap(), b"not json");
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StepStore::new(dir.path());
        store.acquire("revert").unwrap();
        store.release().unwrap();
        store.release().unwrap();
        assert_eq!(store.running().unwrap(), None);
    }

    #[test]
    fn record_and_read_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = StepStore::new(dir.path());
        let mut failed = outcome("revert", Outcome::Failed);
        failed.error = Some("1 error occurred".into());

        store.record(&failed).unwrap();
        assert_eq!(store.outcome("revert").unwrap(), Some(failed));
        assert_eq!(store.outcome("initialize").unwrap(), None);
        assert!(!dir.path().join("revert.status.tmp").exists());
    }

    #[test]
    fn record_onto_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = StepStore::new(dir.path());
        std::fs::create_dir(store.outcome_path("revert")).unwrap();

        assert!(store.record(&outcome("revert", Outcome::Complete)).is_err());
    }
}
