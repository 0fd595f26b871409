//! On-disk dataset layout: a JSON manifest listing recordings and fold splits.
//!
//! Each recording is a raw little-endian `f32` file laid out channel-major
//! (`n_channels` consecutive signals) plus a JSON array with one stage label per
//! 30 s window.

use crate::error::MlError;
use serde::{Deserialize, Serialize};
use somnex_core::DataSplit;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub id: String,
    /// Raw `f32` signal file, relative to the manifest.
    pub signal: PathBuf,
    /// JSON label file, relative to the manifest.
    pub labels: PathBuf,
}

/// Recording ids per split for one cross-validation fold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoldSplit {
    #[serde(default)]
    pub train: Vec<String>,
    #[serde(default)]
    pub valid: Vec<String>,
    #[serde(default)]
    pub test: Vec<String>,
}

impl FoldSplit {
    pub fn ids(&self, split: DataSplit) -> &[String] {
        match split {
            DataSplit::Train => &self.train,
            DataSplit::Valid => &self.valid,
            DataSplit::Test => &self.test,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub sampling_rate: f64,
    #[serde(default = "default_channels")]
    pub n_channels: usize,
    pub recordings: Vec<RecordingEntry>,
    pub folds: BTreeMap<u32, FoldSplit>,
    /// Directory relative paths resolve against. Set on load.
    #[serde(skip)]
    pub root: PathBuf,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_channels() -> usize {
    1
}

/// One recording's signal and per-window labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub id: String,
    /// `n_channels` signals of equal length.
    pub channels: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

impl DatasetManifest {
    pub fn load(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MlError::dataset(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        let mut manifest: Self = serde_json::from_str(&content)?;
        manifest.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        somnex_core::persistence::atomic_write_json(path, self)?;
        Ok(())
    }

    pub fn folds(&self) -> Vec<u32> {
        self.folds.keys().copied().collect()
    }

    pub fn recording_ids(&self, fold: u32, split: DataSplit) -> Result<&[String], MlError> {
        self.folds
            .get(&fold)
            .map(|f| f.ids(split))
            .ok_or_else(|| {
                MlError::not_found(format!("fold {fold} in dataset '{}'", self.name))
            })
    }

    fn entry(&self, id: &str) -> Result<&RecordingEntry, MlError> {
        self.recordings
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| {
                MlError::not_found(format!("recording '{id}' in dataset '{}'", self.name))
            })
    }

    pub fn load_recording(&self, id: &str, n_times: usize) -> Result<Recording, MlError> {
        let entry = self.entry(id)?;
        let signal = read_signal(&self.root.join(&entry.signal))?;
        let labels_path = self.root.join(&entry.labels);
        let labels_text = std::fs::read_to_string(&labels_path).map_err(|e| {
            MlError::dataset(format!("cannot read labels {}: {e}", labels_path.display()))
        })?;
        let labels: Vec<usize> = serde_json::from_str(&labels_text)?;

        let n_channels = self.n_channels.max(1);
        if signal.len() % n_channels != 0 {
            return Err(MlError::dataset(format!(
                "recording '{id}' has {} samples, not divisible by {n_channels} channels",
                signal.len()
            )));
        }
        let per_channel = signal.len() / n_channels;
        if per_channel != labels.len() * n_times {
            return Err(MlError::dataset(format!(
                "recording '{id}': {per_channel} samples per channel, {} windows of {n_times}",
                labels.len()
            )));
        }
        let channels = signal
            .chunks(per_channel.max(1))
            .take(n_channels)
            .map(<[f32]>::to_vec)
            .collect();
        Ok(Recording {
            id: id.to_string(),
            channels,
            labels,
        })
    }
}

/// Read a raw little-endian `f32` file.
pub fn read_signal(path: &Path) -> Result<Vec<f32>, MlError> {
    let bytes = std::fs::read(path)
        .map_err(|e| MlError::dataset(format!("cannot read signal {}: {e}", path.display())))?;
    if bytes.len() % 4 != 0 {
        return Err(MlError::dataset(format!(
            "signal {} has {} bytes, not a multiple of 4",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Write a raw little-endian `f32` file.
pub fn write_signal(path: &Path, samples: &[f32]) -> Result<(), MlError> {
    let bytes: Vec<u8> = samples.iter().flat_map(|x| x.to_le_bytes()).collect();
    somnex_core::persistence::atomic_write(path, &bytes)?;
    Ok(())
}
