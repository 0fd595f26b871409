//! Run records for band-importance and evaluation runs.

use crate::error::MlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    /// Some folds failed and were skipped.
    Partial,
    Failed,
}

/// Outcome of one fold's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldRecord {
    pub fold: u32,
    pub checkpoint: PathBuf,
    /// SHA-256 of the checkpoint file, when it could be read.
    pub checkpoint_digest: Option<String>,
    pub status: FoldStatus,
    pub samples: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Non-fatal problems, e.g. a plot that could not be written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// One run over a set of folds (one band for `explain`, one split for `evaluate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    /// Band name, or `evaluate`.
    pub name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub folds: Vec<FoldRecord>,
}

impl RunRecord {
    pub fn start(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            folds: Vec::new(),
        }
    }

    /// Record a fold, keeping the list ordered by fold id.
    pub fn push_fold(&mut self, record: FoldRecord) {
        let at = self.folds.partition_point(|f| f.fold < record.fold);
        self.folds.insert(at, record);
    }

    pub fn failed_folds(&self) -> Vec<u32> {
        self.folds
            .iter()
            .filter(|f| f.status == FoldStatus::Failed)
            .map(|f| f.fold)
            .collect()
    }

    pub fn total_samples(&self) -> usize {
        self.folds
            .iter()
            .filter(|f| f.status == FoldStatus::Completed)
            .map(|f| f.samples)
            .sum()
    }

    /// Close the run. `aborted` marks the run failed regardless of fold outcomes.
    pub fn finish(&mut self, aborted: bool) {
        self.finished_at = Some(Utc::now());
        let failed = self.failed_folds().len();
        self.status = if aborted || (failed > 0 && failed == self.folds.len()) {
            RunStatus::Failed
        } else if failed > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
    }

    pub fn load(path: &Path) -> Result<Option<Self>, MlError> {
        Ok(somnex_core::persistence::load_json(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        somnex_core::persistence::atomic_write_json(path, self)?;
        Ok(())
    }
}
