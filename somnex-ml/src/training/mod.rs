//! Training artifacts consumed by explanation runs: checkpoints, metrics and run records.

pub mod checkpoint;
pub mod experiment;
pub mod metrics;

pub use checkpoint::{CHECKPOINT_EXTENSION, CheckpointRegistry, ClassifierCheckpoint, file_digest};
pub use experiment::{FoldRecord, FoldStatus, RunRecord, RunStatus};
pub use metrics::ClassificationMetrics;
