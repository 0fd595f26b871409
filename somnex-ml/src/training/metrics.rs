//! Classification metrics for per-fold evaluation.

use crate::error::MlError;
use serde::{Deserialize, Serialize};

/// Classification metrics. Precision, recall and F1 are macro averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub samples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// Cohen's kappa.
    pub kappa: f64,
    /// `confusion_matrix[true][predicted]`.
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl ClassificationMetrics {
    pub fn from_labels(
        true_labels: &[usize],
        predicted: &[usize],
        n_classes: usize,
    ) -> Result<Self, MlError> {
        if true_labels.len() != predicted.len() {
            return Err(MlError::shape(
                "label vectors",
                true_labels.len(),
                predicted.len(),
            ));
        }
        if let Some(&bad) = true_labels
            .iter()
            .chain(predicted)
            .find(|&&label| label >= n_classes)
        {
            return Err(MlError::invalid_input(format!(
                "label {bad} outside 0..{n_classes}"
            )));
        }

        let mut confusion = vec![vec![0usize; n_classes]; n_classes];
        for (&t, &p) in true_labels.iter().zip(predicted) {
            confusion[t][p] += 1;
        }

        let total = true_labels.len();
        if total == 0 {
            return Ok(Self {
                samples: 0,
                accuracy: 0.0,
                precision: 0.0,
                recall: 0.0,
                f1_score: 0.0,
                kappa: 0.0,
                confusion_matrix: confusion,
            });
        }

        let n = total as f64;
        let correct: usize = (0..n_classes).map(|k| confusion[k][k]).sum();
        let accuracy = correct as f64 / n;

        let mut precision = 0.0;
        let mut recall = 0.0;
        let mut f1 = 0.0;
        let mut expected_agreement = 0.0;
        for k in 0..n_classes {
            let tp = confusion[k][k] as f64;
            let actual: usize = confusion[k].iter().sum();
            let predicted_k: usize = confusion.iter().map(|row| row[k]).sum();
            let p = if predicted_k > 0 { tp / predicted_k as f64 } else { 0.0 };
            let r = if actual > 0 { tp / actual as f64 } else { 0.0 };
            precision += p;
            recall += r;
            f1 += if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
            expected_agreement += (actual as f64 / n) * (predicted_k as f64 / n);
        }
        let classes = n_classes as f64;
        let kappa = if (1.0 - expected_agreement).abs() < f64::EPSILON {
            // Both raters used a single class.
            if accuracy == 1.0 { 1.0 } else { 0.0 }
        } else {
            (accuracy - expected_agreement) / (1.0 - expected_agreement)
        };

        Ok(Self {
            samples: total,
            accuracy,
            precision: precision / classes,
            recall: recall / classes,
            f1_score: f1 / classes,
            kappa,
            confusion_matrix: confusion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let labels = [0, 1, 2, 2, 1, 0];
        let metrics = ClassificationMetrics::from_labels(&labels, &labels, 3).unwrap();
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.f1_score, 1.0);
        assert_eq!(metrics.kappa, 1.0);
        assert_eq!(metrics.confusion_matrix[2][2], 2);
    }

    #[test]
    fn test_mixed_predictions() {
        let truth = [0, 0, 1, 1];
        let pred = [0, 1, 1, 1];
        let metrics = ClassificationMetrics::from_labels(&truth, &pred, 2).unwrap();
        assert_eq!(metrics.accuracy, 0.75);
        // class 0: p=1, r=0.5; class 1: p=2/3, r=1
        assert!((metrics.precision - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
        assert!((metrics.recall - 0.75).abs() < 1e-12);
        // p_o = 0.75, p_e = 0.5*0.25 + 0.5*0.75 = 0.5
        assert!((metrics.kappa - 0.5).abs() < 1e-12);
        assert_eq!(metrics.confusion_matrix, vec![vec![1, 1], vec![0, 2]]);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(ClassificationMetrics::from_labels(&[0, 1], &[0], 2).is_err());
        assert!(ClassificationMetrics::from_labels(&[0, 5], &[0, 1], 5).is_err());
    }

    #[test]
    fn test_empty() {
        let metrics = ClassificationMetrics::from_labels(&[], &[], 5).unwrap();
        assert_eq!(metrics.samples, 0);
        assert_eq!(metrics.confusion_matrix.len(), 5);
    }
}
