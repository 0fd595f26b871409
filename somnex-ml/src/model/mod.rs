//! Frozen classifiers: the inference trait, the spectral reference model and checkpoint loading.

pub mod classifier;
pub mod loader;
pub mod spectral;

pub use classifier::{Classifier, argmax_rows, softmax};
pub use loader::{CheckpointClassifierLoader, ClassifierLoader};
pub use spectral::{ModelParams, SpectralLinearClassifier, SpectralLinearParams};
