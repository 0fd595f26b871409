//! The inference-only classifier interface.

use crate::error::MlError;
use ndarray::{Array2, ArrayView2, ArrayView4, Axis};

/// A trained sleep-stage classifier in evaluation mode.
///
/// Only `&self` methods are exposed: a loaded classifier cannot be updated, so
/// running it on original and perturbed inputs never changes its parameters.
pub trait Classifier: Send {
    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Raw scores, shape `(batch, num_classes)`, for a `(batch, seq, channel, sample)` input.
    fn logits(&self, inputs: ArrayView4<'_, f32>) -> Result<Array2<f32>, MlError>;

    /// Class probabilities (row-wise softmax of [`Classifier::logits`]).
    fn predict_proba(&self, inputs: ArrayView4<'_, f32>) -> Result<Array2<f32>, MlError> {
        let logits = self.logits(inputs)?;
        Ok(softmax(logits.view()))
    }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn logits(&self, inputs: ArrayView4<'_, f32>) -> Result<Array2<f32>, MlError> {
        (**self).logits(inputs)
    }

    fn predict_proba(&self, inputs: ArrayView4<'_, f32>) -> Result<Array2<f32>, MlError> {
        (**self).predict_proba(inputs)
    }
}

/// Numerically stable row-wise softmax.
pub fn softmax(logits: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut probs = logits.to_owned();
    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|x| x / sum);
        }
    }
    probs
}

/// Index of the largest value in each row; ties resolve to the lowest index.
pub fn argmax_rows(values: ArrayView2<'_, f32>) -> Vec<usize> {
    values
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = i;
                }
            }
            best
        })
        .collect()
}
