//! Turning checkpoint files into classifiers.

use crate::error::MlError;
use crate::model::classifier::Classifier;
use crate::model::spectral::{ModelParams, SpectralLinearClassifier};
use crate::training::checkpoint::ClassifierCheckpoint;
use somnex_core::ModuleConfig;
use std::path::Path;

/// Loads a frozen classifier for a fold. Implementations must be usable from
/// several fold workers at once.
pub trait ClassifierLoader: Send + Sync {
    fn load(&self, path: &Path, module: &ModuleConfig) -> Result<Box<dyn Classifier>, MlError>;
}

/// Loads [`ClassifierCheckpoint`] JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointClassifierLoader;

impl CheckpointClassifierLoader {
    fn check_compatible(
        path: &Path,
        checkpoint: &ClassifierCheckpoint,
        module: &ModuleConfig,
    ) -> Result<(), MlError> {
        let trained = &checkpoint.module;
        if checkpoint.model.model_name() != module.model_name {
            return Err(MlError::checkpoint(
                path,
                format!(
                    "holds a '{}' model, configuration expects '{}'",
                    checkpoint.model.model_name(),
                    module.model_name
                ),
            ));
        }
        if checkpoint.model.num_classes() != module.n_classes {
            return Err(MlError::checkpoint(
                path,
                format!(
                    "model has {} classes, configuration expects {}",
                    checkpoint.model.num_classes(),
                    module.n_classes
                ),
            ));
        }
        if trained.n_times != module.n_times || trained.sfreq != module.sfreq {
            return Err(MlError::checkpoint(
                path,
                format!(
                    "trained on {} samples at {} Hz, configuration uses {} samples at {} Hz",
                    trained.n_times, trained.sfreq, module.n_times, module.sfreq
                ),
            ));
        }
        Ok(())
    }
}

impl ClassifierLoader for CheckpointClassifierLoader {
    fn load(&self, path: &Path, module: &ModuleConfig) -> Result<Box<dyn Classifier>, MlError> {
        let checkpoint = ClassifierCheckpoint::load(path)?;
        Self::check_compatible(path, &checkpoint, module)?;
        tracing::debug!(
            path = %path.display(),
            fold = checkpoint.fold,
            epoch = checkpoint.epoch,
            val_acc = checkpoint.val_acc,
            "Loaded checkpoint"
        );

        match checkpoint.model {
            ModelParams::SpectralLinear(params) => {
                let model = SpectralLinearClassifier::new(params, module.sfreq, module.n_times)
                    .map_err(|e| MlError::checkpoint(path, e.to_string()))?;
                Ok(Box::new(model))
            }
        }
    }
}
