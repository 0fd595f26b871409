//! Sleep recordings, fold splits and labeled batch streams.

pub mod batch;
pub mod dataset;
pub mod module;
pub mod provider;

pub use batch::{BatchShape, LabeledBatch};
pub use dataset::{DatasetManifest, FoldSplit, Recording, RecordingEntry, read_signal, write_signal};
pub use module::{SequenceBatches, SleepDataModule};
pub use provider::{BatchProvider, BatchStream, InMemoryBatchProvider, ManifestBatchProvider};
