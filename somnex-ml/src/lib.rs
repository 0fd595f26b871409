//! # somnex-ml: frequency-band importance for sleep-stage classifiers
//!
//! A frozen classifier scores each labeled sequence twice: once as recorded and
//! once with a frequency band removed by a Butterworth band-stop filter. The
//! drop in per-class probability is reported as the band's importance.
//!
//! - [`signal`]: frequency bands and band-stop filtering
//! - [`model`]: the classifier interface and checkpoint loading
//! - [`data`]: dataset manifests, sliding-sequence batching, per-fold streams
//! - [`training`]: checkpoints, metrics and run records
//! - [`interpretability`]: the importance estimator, reports and fold orchestrator

pub mod data;
pub mod error;
pub mod interpretability;
pub mod model;
pub mod signal;
pub mod training;

// Re-exports
pub use data::{BatchProvider, BatchShape, LabeledBatch, ManifestBatchProvider};
pub use error::MlError;
pub use interpretability::{
    BandImportance, BandImportanceTable, BandRun, EvaluationRun, FreqBandsExplainer,
    compute_band_importance,
};
pub use model::{CheckpointClassifierLoader, Classifier, ClassifierLoader};
pub use signal::{BandStopFilter, FrequencyBand, SignalFilter};
pub use training::{CheckpointRegistry, ClassifierCheckpoint};
