//! Labeled waveform batches and the shape they must have.

use crate::error::MlError;
use ndarray::Array4;
use somnex_core::ModuleConfig;

/// A `(batch, seq, channel, sample)` waveform array with one label per element.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBatch {
    pub inputs: Array4<f32>,
    pub labels: Vec<usize>,
}

impl LabeledBatch {
    pub fn new(inputs: Array4<f32>, labels: Vec<usize>) -> Self {
        Self { inputs, labels }
    }

    pub fn len(&self) -> usize {
        self.inputs.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Expected layout of every batch fed to a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchShape {
    pub seq_len: usize,
    pub n_channels: usize,
    pub n_times: usize,
    pub n_classes: usize,
}

impl BatchShape {
    pub fn from_module(module: &ModuleConfig) -> Self {
        Self {
            seq_len: module.seq_len,
            n_channels: module.n_channels,
            n_times: module.n_times,
            n_classes: module.n_classes,
        }
    }

    /// Check axes 1..4 and the label vector of `batch`.
    pub fn check(&self, batch: &LabeledBatch) -> Result<(), MlError> {
        let (n, seq_len, channels, n_times) = batch.inputs.dim();
        let expected = (self.seq_len, self.n_channels, self.n_times);
        if (seq_len, channels, n_times) != expected {
            return Err(MlError::shape(
                "batch (seq, channel, sample)",
                expected,
                (seq_len, channels, n_times),
            ));
        }
        if batch.labels.len() != n {
            return Err(MlError::shape("label count", n, batch.labels.len()));
        }
        if let Some(&label) = batch.labels.iter().find(|&&l| l >= self.n_classes) {
            return Err(MlError::dataset(format!(
                "label {label} outside 0..{}",
                self.n_classes
            )));
        }
        Ok(())
    }
}
