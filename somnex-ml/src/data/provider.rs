//! Per-fold batch streams.

use crate::data::batch::{BatchShape, LabeledBatch};
use crate::data::dataset::DatasetManifest;
use crate::data::module::SleepDataModule;
use crate::error::MlError;
use somnex_core::{DataSplit, SomnexConfig};
use std::path::Path;

/// A stream of labeled batches owned by one fold worker.
pub type BatchStream = Box<dyn Iterator<Item = Result<LabeledBatch, MlError>> + Send>;

/// Opens a fresh, independent batch stream for a fold.
pub trait BatchProvider: Send + Sync {
    fn open(&self, fold: u32) -> Result<BatchStream, MlError>;
}

/// Builds a [`SleepDataModule`] from a dataset manifest on every call, so no
/// state is shared between folds.
#[derive(Debug, Clone)]
pub struct ManifestBatchProvider {
    manifest: DatasetManifest,
    split: DataSplit,
    shape: BatchShape,
    batch_size: usize,
}

impl ManifestBatchProvider {
    pub fn new(
        manifest: DatasetManifest,
        split: DataSplit,
        shape: BatchShape,
        batch_size: usize,
    ) -> Self {
        Self {
            manifest,
            split,
            shape,
            batch_size,
        }
    }

    /// Provider for the manifest and split named in `config`.
    pub fn from_config(config: &SomnexConfig) -> Result<Self, MlError> {
        let path = config
            .data
            .manifest
            .as_deref()
            .ok_or_else(|| MlError::Config("data.manifest is not set".to_string()))?;
        Self::from_path(path, config)
    }

    pub fn from_path(path: &Path, config: &SomnexConfig) -> Result<Self, MlError> {
        let manifest = DatasetManifest::load(path)?;
        if (manifest.sampling_rate - config.model.sfreq).abs() > f64::EPSILON {
            return Err(MlError::dataset(format!(
                "dataset '{}' is sampled at {} Hz, models expect {} Hz",
                manifest.name, manifest.sampling_rate, config.model.sfreq
            )));
        }
        Ok(Self::new(
            manifest,
            config.data.split,
            BatchShape::from_module(&config.model),
            config.data.batch_size,
        ))
    }

    pub fn manifest(&self) -> &DatasetManifest {
        &self.manifest
    }

    pub fn split(&self) -> DataSplit {
        self.split
    }

    pub fn module(&self, fold: u32) -> Result<SleepDataModule, MlError> {
        SleepDataModule::from_manifest(
            &self.manifest,
            fold,
            self.split,
            self.shape,
            self.batch_size,
        )
    }
}

impl BatchProvider for ManifestBatchProvider {
    fn open(&self, fold: u32) -> Result<BatchStream, MlError> {
        let module = self.module(fold)?;
        tracing::debug!(
            fold,
            split = %self.split,
            sequences = module.len(),
            batches = module.num_batches(),
            "Opened fold data"
        );
        Ok(Box::new(module.into_batches()))
    }
}

/// Serves fixed in-memory batches; every `open` replays the same fold's batches.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBatchProvider {
    folds: std::collections::BTreeMap<u32, Vec<LabeledBatch>>,
}

impl InMemoryBatchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fold(mut self, fold: u32, batches: Vec<LabeledBatch>) -> Self {
        self.folds.insert(fold, batches);
        self
    }
}

impl BatchProvider for InMemoryBatchProvider {
    fn open(&self, fold: u32) -> Result<BatchStream, MlError> {
        let batches = self
            .folds
            .get(&fold)
            .cloned()
            .ok_or_else(|| MlError::not_found(format!("batches for fold {fold}")))?;
        Ok(Box::new(batches.into_iter().map(Ok)))
    }
}
