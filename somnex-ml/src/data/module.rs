//! Sliding-sequence batching over loaded recordings.

use crate::data::batch::{BatchShape, LabeledBatch};
use crate::data::dataset::{DatasetManifest, Recording};
use crate::error::MlError;
use ndarray::{Array4, s};
use somnex_core::DataSplit;

/// Sequences of `seq_len` consecutive windows (stride 1) taken from every recording,
/// labelled with the stage of the central window.
#[derive(Debug, Clone)]
pub struct SleepDataModule {
    recordings: Vec<Recording>,
    shape: BatchShape,
    batch_size: usize,
    /// `(recording, first window)` of every sequence, in iteration order.
    index: Vec<(usize, usize)>,
}

impl SleepDataModule {
    pub fn new(
        recordings: Vec<Recording>,
        shape: BatchShape,
        batch_size: usize,
    ) -> Result<Self, MlError> {
        if batch_size == 0 {
            return Err(MlError::invalid_input("batch size must be positive"));
        }
        if shape.seq_len == 0 {
            return Err(MlError::invalid_input("sequence length must be positive"));
        }

        let mut index = Vec::new();
        for (r, rec) in recordings.iter().enumerate() {
            let windows = rec.labels.len();
            if windows == 0 {
                continue;
            }
            if rec.channels.len() != shape.n_channels {
                return Err(MlError::shape(
                    format!("channels of recording '{}'", rec.id),
                    shape.n_channels,
                    rec.channels.len(),
                ));
            }
            let expected = windows * shape.n_times;
            if let Some(ch) = rec.channels.iter().find(|c| c.len() != expected) {
                return Err(MlError::shape(
                    format!("samples of recording '{}'", rec.id),
                    expected,
                    ch.len(),
                ));
            }
            if windows < shape.seq_len {
                tracing::debug!(
                    recording = %rec.id,
                    windows,
                    seq_len = shape.seq_len,
                    "Recording shorter than one sequence"
                );
                continue;
            }
            index.extend((0..=windows - shape.seq_len).map(|start| (r, start)));
        }

        Ok(Self {
            recordings,
            shape,
            batch_size,
            index,
        })
    }

    /// Load the recordings of `fold`'s `split` listed in `manifest`.
    pub fn from_manifest(
        manifest: &DatasetManifest,
        fold: u32,
        split: DataSplit,
        shape: BatchShape,
        batch_size: usize,
    ) -> Result<Self, MlError> {
        if manifest.n_channels != shape.n_channels {
            return Err(MlError::shape(
                format!("channels of dataset '{}'", manifest.name),
                shape.n_channels,
                manifest.n_channels,
            ));
        }
        let recordings = manifest
            .recording_ids(fold, split)?
            .iter()
            .map(|id| manifest.load_recording(id, shape.n_times))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(recordings, shape, batch_size)
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.index.len().div_ceil(self.batch_size)
    }

    /// Label of every sequence, in iteration order.
    pub fn labels(&self) -> Vec<usize> {
        let center = self.shape.seq_len / 2;
        self.index
            .iter()
            .map(|&(r, start)| self.recordings[r].labels[start + center])
            .collect()
    }

    /// Balanced class weights `n / (k * count)`, scaled to mean 1 over present classes.
    /// Absent classes get weight 0.
    pub fn class_weights(&self) -> Vec<f32> {
        let k = self.shape.n_classes;
        let mut counts = vec![0usize; k];
        for label in self.labels() {
            if let Some(c) = counts.get_mut(label) {
                *c += 1;
            }
        }
        let total: usize = counts.iter().sum();
        let raw: Vec<f32> = counts
            .iter()
            .map(|&c| {
                if c == 0 {
                    0.0
                } else {
                    total as f32 / (k as f32 * c as f32)
                }
            })
            .collect();
        let present = counts.iter().filter(|&&c| c > 0).count();
        if present == 0 {
            return raw;
        }
        let mean = raw.iter().sum::<f32>() / present as f32;
        raw.into_iter().map(|w| w / mean).collect()
    }

    fn batch(&self, number: usize) -> Result<LabeledBatch, MlError> {
        let from = number * self.batch_size;
        let to = (from + self.batch_size).min(self.index.len());
        let entries = &self.index[from..to];
        let BatchShape {
            seq_len,
            n_channels,
            n_times,
            ..
        } = self.shape;

        let mut inputs = Array4::<f32>::zeros((entries.len(), seq_len, n_channels, n_times));
        let mut labels = Vec::with_capacity(entries.len());
        for (b, &(r, start)) in entries.iter().enumerate() {
            let rec = &self.recordings[r];
            for w in 0..seq_len {
                let offset = (start + w) * n_times;
                for (c, channel) in rec.channels.iter().enumerate() {
                    let window = channel.get(offset..offset + n_times).ok_or_else(|| {
                        MlError::dataset(format!("recording '{}' ends inside window", rec.id))
                    })?;
                    inputs
                        .slice_mut(s![b, w, c, ..])
                        .assign(&ndarray::ArrayView1::from(window));
                }
            }
            labels.push(rec.labels[start + seq_len / 2]);
        }
        Ok(LabeledBatch::new(inputs, labels))
    }

    /// Consume the module into its batch stream, in deterministic order.
    pub fn into_batches(self) -> SequenceBatches {
        SequenceBatches {
            module: self,
            next: 0,
        }
    }
}

/// Iterator returned by [`SleepDataModule::into_batches`].
#[derive(Debug)]
pub struct SequenceBatches {
    module: SleepDataModule,
    next: usize,
}

impl Iterator for SequenceBatches {
    type Item = Result<LabeledBatch, MlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.module.num_batches() {
            return None;
        }
        let batch = self.module.batch(self.next);
        self.next += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.module.num_batches().saturating_sub(self.next);
        (left, Some(left))
    }
}
