//! Frequency-band importance by ablation.
//!
//! For each batch the frozen classifier scores the original input and a
//! band-stop filtered copy; the drop in per-class probability is the band's
//! importance for that sample.

use crate::data::{BatchShape, LabeledBatch};
use crate::error::MlError;
use crate::model::{Classifier, argmax_rows};
use crate::signal::{SignalFilter, filter_batch};
use ndarray::{Array2, ArrayView2, Axis};
use somnex_core::FilterScope;

/// Row-aligned per-sample results of one pass over a batch stream.
///
/// Row `i` of `importance`, `predicted[i]` and `true_labels[i]` describe the same
/// sample, in batch iteration order.
#[derive(Debug, Clone, PartialEq)]
pub struct BandImportance {
    /// `(samples, classes)`: baseline minus filtered probability.
    pub importance: Array2<f32>,
    pub predicted: Vec<usize>,
    pub true_labels: Vec<usize>,
}

impl BandImportance {
    pub fn empty(n_classes: usize) -> Self {
        Self {
            importance: Array2::zeros((0, n_classes)),
            predicted: Vec::new(),
            true_labels: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.true_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.true_labels.is_empty()
    }

    pub fn n_classes(&self) -> usize {
        self.importance.ncols()
    }

    /// Importance of each sample's true class.
    pub fn true_label_importance(&self) -> Vec<f32> {
        pick(self.importance.view(), &self.true_labels)
    }

    /// Importance of each sample's predicted class.
    pub fn predicted_label_importance(&self) -> Vec<f32> {
        pick(self.importance.view(), &self.predicted)
    }
}

fn pick(importance: ArrayView2<'_, f32>, labels: &[usize]) -> Vec<f32> {
    importance
        .axis_iter(Axis(0))
        .zip(labels)
        .map(|(row, &label)| row.get(label).copied().unwrap_or(f32::NAN))
        .collect()
}

/// Run `classifier` on every batch and on its band-stop filtered copy.
///
/// Batches must match `shape`; the classifier must emit `shape.n_classes`
/// probabilities per sample. Input batches are never modified. An empty stream
/// yields empty arrays with `shape.n_classes` columns.
pub fn compute_band_importance<C, F, I>(
    classifier: &C,
    batches: I,
    filter: &F,
    scope: FilterScope,
    shape: &BatchShape,
) -> Result<BandImportance, MlError>
where
    C: Classifier + ?Sized,
    F: SignalFilter + ?Sized,
    I: IntoIterator<Item = Result<LabeledBatch, MlError>>,
{
    let n_classes = shape.n_classes;
    if classifier.num_classes() != n_classes {
        return Err(MlError::shape(
            "classifier classes",
            n_classes,
            classifier.num_classes(),
        ));
    }

    let mut importance: Vec<f32> = Vec::new();
    let mut predicted = Vec::new();
    let mut true_labels = Vec::new();

    for (index, batch) in batches.into_iter().enumerate() {
        let batch = batch?;
        shape.check(&batch)?;
        let n = batch.len();

        let baseline = classifier.predict_proba(batch.inputs.view())?;
        check_output(&baseline, n, n_classes)?;

        let filtered = filter_batch(batch.inputs.view(), filter, scope)?;
        let perturbed = classifier.predict_proba(filtered.view())?;
        check_output(&perturbed, n, n_classes)?;

        predicted.extend(argmax_rows(baseline.view()));
        true_labels.extend_from_slice(&batch.labels);
        importance.extend((&baseline - &perturbed).iter().copied());
        tracing::trace!(batch = index, samples = n, "Scored batch");
    }

    let rows = true_labels.len();
    Ok(BandImportance {
        importance: Array2::from_shape_vec((rows, n_classes), importance)?,
        predicted,
        true_labels,
    })
}

fn check_output(probs: &Array2<f32>, samples: usize, n_classes: usize) -> Result<(), MlError> {
    if probs.dim() != (samples, n_classes) {
        return Err(MlError::shape(
            "classifier output",
            (samples, n_classes),
            probs.dim(),
        ));
    }
    Ok(())
}
