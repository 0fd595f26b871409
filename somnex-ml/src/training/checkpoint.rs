//! Per-fold classifier checkpoints and their discovery on disk.

use crate::error::MlError;
use crate::model::ModelParams;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use somnex_core::ModuleConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extension of checkpoint files written by the trainer.
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// A trained classifier as stored for one cross-validation fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierCheckpoint {
    /// The module configuration the model was trained with.
    pub module: ModuleConfig,
    pub fold: u32,
    pub epoch: u32,
    pub step: u64,
    pub val_acc: f64,
    pub created_at: DateTime<Utc>,
    pub model: ModelParams,
}

impl ClassifierCheckpoint {
    pub fn new(module: ModuleConfig, fold: u32, model: ModelParams) -> Self {
        Self {
            module,
            fold,
            epoch: 0,
            step: 0,
            val_acc: 0.0,
            created_at: Utc::now(),
            model,
        }
    }

    /// File name in the trainer's `fold=<k>-epoch=<e>-step=<s>-val_acc=<a>.ckpt` layout.
    pub fn file_name(&self) -> String {
        format!(
            "fold={}-epoch={}-step={}-val_acc={:.4}.{CHECKPOINT_EXTENSION}",
            self.fold, self.epoch, self.step, self.val_acc
        )
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| MlError::checkpoint(path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| MlError::checkpoint(path, e.to_string()))
    }

    /// Write the checkpoint into `dir` under [`ClassifierCheckpoint::file_name`].
    pub fn save(&self, dir: &Path) -> Result<PathBuf, MlError> {
        let path = dir.join(self.file_name());
        somnex_core::persistence::atomic_write_json(&path, self)?;
        Ok(path)
    }
}

/// SHA-256 of a file's content, hex encoded.
pub fn file_digest(path: &Path) -> Result<String, MlError> {
    let bytes = std::fs::read(path).map_err(|e| MlError::checkpoint(path, e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fold id to checkpoint path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointRegistry {
    entries: BTreeMap<u32, PathBuf>,
}

impl CheckpointRegistry {
    /// Scan `dir` (non-recursively) for `*.ckpt` files naming a `fold=<k>`.
    ///
    /// When a fold has several files the lexicographically first name wins.
    pub fn discover(dir: &Path) -> Result<Self, MlError> {
        if !dir.is_dir() {
            return Err(MlError::not_found(format!(
                "checkpoint directory {}",
                dir.display()
            )));
        }
        let pattern = Regex::new(r"fold=(\d+)")
            .map_err(|e| MlError::invalid_input(format!("fold pattern: {e}")))?;

        let mut candidates: BTreeMap<u32, Vec<PathBuf>> = BTreeMap::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let Some(fold) = pattern
                .captures(&name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            else {
                tracing::debug!(path = %path.display(), "Skipping checkpoint without fold id");
                continue;
            };
            candidates.entry(fold).or_default().push(path.to_path_buf());
        }

        let entries = candidates
            .into_iter()
            .filter_map(|(fold, mut paths)| {
                paths.sort();
                if paths.len() > 1 {
                    tracing::warn!(
                        fold,
                        count = paths.len(),
                        "Several checkpoints for fold, using the first"
                    );
                }
                paths.into_iter().next().map(|p| (fold, p))
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn from_paths(entries: impl IntoIterator<Item = (u32, PathBuf)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Fold ids in ascending order.
    pub fn folds(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn get(&self, fold: u32) -> Option<&Path> {
        self.entries.get(&fold).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Path)> {
        self.entries.iter().map(|(f, p)| (*f, p.as_path()))
    }

    /// Restrict the registry to `folds`; an unknown fold is an error.
    pub fn select(&self, folds: &[u32]) -> Result<Self, MlError> {
        let mut entries = BTreeMap::new();
        for &fold in folds {
            let path = self
                .entries
                .get(&fold)
                .ok_or_else(|| MlError::not_found(format!("checkpoint for fold {fold}")))?;
            entries.insert(fold, path.clone());
        }
        Ok(Self { entries })
    }
}
