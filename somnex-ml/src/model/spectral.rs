//! Spectral linear classifier: log band power of the central window, then a linear layer.

use crate::error::MlError;
use crate::model::classifier::Classifier;
use ndarray::{Array2, ArrayView4, s};
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const POWER_FLOOR: f32 = 1e-12;

/// Parameters of every model kind a checkpoint can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelParams {
    SpectralLinear(SpectralLinearParams),
}

impl ModelParams {
    /// Model name as used in module configurations.
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelParams::SpectralLinear(_) => "spectral_linear",
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            ModelParams::SpectralLinear(p) => p.bias.len(),
        }
    }
}

/// Learned parameters of [`SpectralLinearClassifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralLinearParams {
    /// Feature bands as `[low_hz, high_hz]`, inclusive.
    pub feature_bands: Vec<[f64; 2]>,
    /// One row per class, one column per feature band.
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

/// Scores each sequence from the log mean power of its central window in a set of
/// feature bands. Channels are averaged in feature space.
pub struct SpectralLinearClassifier {
    params: SpectralLinearParams,
    n_times: usize,
    bins: Vec<(usize, usize)>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl std::fmt::Debug for SpectralLinearClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralLinearClassifier")
            .field("params", &self.params)
            .field("n_times", &self.n_times)
            .field("bins", &self.bins)
            .finish()
    }
}

impl SpectralLinearClassifier {
    pub fn new(
        params: SpectralLinearParams,
        sampling_rate: f64,
        n_times: usize,
    ) -> Result<Self, MlError> {
        let n_features = params.feature_bands.len();
        if n_features == 0 {
            return Err(MlError::model("spectral model has no feature bands"));
        }
        if params.bias.is_empty() {
            return Err(MlError::model("spectral model has no classes"));
        }
        if params.weights.len() != params.bias.len() {
            return Err(MlError::shape(
                "weight rows",
                params.bias.len(),
                params.weights.len(),
            ));
        }
        if let Some(row) = params.weights.iter().find(|row| row.len() != n_features) {
            return Err(MlError::shape("weight columns", n_features, row.len()));
        }
        if n_times < 2 || !sampling_rate.is_finite() || sampling_rate <= 0.0 {
            return Err(MlError::model(format!(
                "cannot build spectra for {n_times} samples at {sampling_rate} Hz"
            )));
        }

        let resolution = sampling_rate / n_times as f64;
        let last_bin = n_times / 2;
        let mut bins = Vec::with_capacity(n_features);
        for &[low, high] in &params.feature_bands {
            let first = (low / resolution).ceil().max(0.0) as usize;
            let last = ((high / resolution).floor() as usize).min(last_bin);
            let ordered = low.is_finite() && high.is_finite() && low < high;
            if !ordered || first > last {
                return Err(MlError::model(format!(
                    "feature band [{low}, {high}] Hz holds no bin at {resolution:.4} Hz resolution"
                )));
            }
            bins.push((first, last));
        }

        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(n_times);
        Ok(Self {
            params,
            n_times,
            bins,
            fft,
        })
    }

    pub fn params(&self) -> &SpectralLinearParams {
        &self.params
    }

    /// Log mean power per feature band of one window.
    pub fn features(&self, window: &[f32]) -> Result<Vec<f32>, MlError> {
        if window.len() != self.n_times {
            return Err(MlError::shape("window length", self.n_times, window.len()));
        }
        let mut input = window.to_vec();
        let mut spectrum = self.fft.make_output_vec();
        self.fft
            .process(&mut input, &mut spectrum)
            .map_err(|e| MlError::model(format!("FFT failed: {e}")))?;

        let scale = self.n_times as f32;
        Ok(self
            .bins
            .iter()
            .map(|&(first, last)| {
                let band = &spectrum[first..=last];
                let power = band.iter().map(|c| c.norm_sqr() / scale).sum::<f32>()
                    / band.len() as f32;
                (power + POWER_FLOOR).ln()
            })
            .collect())
    }
}

impl Classifier for SpectralLinearClassifier {
    fn num_classes(&self) -> usize {
        self.params.bias.len()
    }

    fn logits(&self, inputs: ArrayView4<'_, f32>) -> Result<Array2<f32>, MlError> {
        let (batch, seq_len, channels, n_times) = inputs.dim();
        if n_times != self.n_times {
            return Err(MlError::shape("samples per window", self.n_times, n_times));
        }
        if seq_len == 0 || channels == 0 {
            return Err(MlError::shape(
                "sequence/channel axes",
                "non-empty",
                (seq_len, channels),
            ));
        }
        let center = seq_len / 2;
        let n_features = self.bins.len();
        let mut logits = Array2::<f32>::zeros((batch, self.num_classes()));

        for b in 0..batch {
            let mut features = vec![0.0f32; n_features];
            for c in 0..channels {
                let window = inputs.slice(s![b, center, c, ..]).to_vec();
                for (acc, f) in features.iter_mut().zip(self.features(&window)?) {
                    *acc += f / channels as f32;
                }
            }
            let rows = self.params.weights.iter().zip(&self.params.bias);
            for (k, (row, bias)) in rows.enumerate() {
                logits[[b, k]] = bias + row.iter().zip(&features).map(|(w, f)| w * f).sum::<f32>();
            }
        }
        Ok(logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::classifier::argmax_rows;
    use ndarray::Array4;
    use std::f32::consts::PI;

    const FS: f64 = 100.0;
    const N: usize = 3000;

    /// Two classes: "slow" likes delta power, "fast" likes alpha power.
    fn two_band_params() -> SpectralLinearParams {
        SpectralLinearParams {
            feature_bands: vec![[0.5, 4.0], [8.0, 12.0]],
            weights: vec![vec![1.0, -1.0], vec![-1.0, 1.0]],
            bias: vec![0.0, 0.0],
        }
    }

    fn sine_window(freq: f32) -> Vec<f32> {
        (0..N)
            .map(|i| (2.0 * PI * freq * i as f32 / FS as f32).sin())
            .collect()
    }

    #[test]
    fn test_rejects_inconsistent_params() {
        let mut params = two_band_params();
        params.weights.pop();
        assert!(SpectralLinearClassifier::new(params, FS, N).is_err());

        let mut params = two_band_params();
        params.weights[0].push(0.5);
        assert!(SpectralLinearClassifier::new(params, FS, N).is_err());

        let mut params = two_band_params();
        // narrower than one bin at 1/30 Hz resolution, between bins 300 and 301
        params.feature_bands[1] = [10.005, 10.02];
        assert!(SpectralLinearClassifier::new(params, FS, N).is_err());
    }

    #[test]
    fn test_rejects_reversed_and_nan_feature_bands() {
        for band in [[12.0, 8.0], [f64::NAN, 12.0], [8.0, f64::NAN], [8.0, f64::INFINITY]] {
            let mut params = two_band_params();
            params.feature_bands[1] = band;
            let err = SpectralLinearClassifier::new(params, FS, N).unwrap_err();
            assert!(matches!(err, MlError::Model(_)), "{band:?}: {err}");
        }
    }

    #[test]
    fn test_features_track_band_power() {
        let model = SpectralLinearClassifier::new(two_band_params(), FS, N).unwrap();
        let slow = model.features(&sine_window(2.0)).unwrap();
        let fast = model.features(&sine_window(10.0)).unwrap();
        assert!(slow[0] > slow[1]);
        assert!(fast[1] > fast[0]);
        assert!(model.features(&[0.0; 10]).is_err());
    }

    #[test]
    fn test_logits_use_central_window() {
        let model = SpectralLinearClassifier::new(two_band_params(), FS, N).unwrap();
        let slow = sine_window(2.0);
        let fast = sine_window(10.0);
        // element 0: fast in the centre; element 1: slow in the centre.
        let data = [
            slow.clone(),
            fast.clone(),
            slow.clone(),
            fast.clone(),
            slow,
            fast,
        ]
        .concat();
        let inputs = Array4::from_shape_vec((2, 3, 1, N), data).unwrap();
        let probs = model.predict_proba(inputs.view()).unwrap();
        assert_eq!(probs.dim(), (2, 2));
        assert_eq!(argmax_rows(probs.view()), vec![1, 0]);
    }

    #[test]
    fn test_wrong_window_length_is_shape_error() {
        let model = SpectralLinearClassifier::new(two_band_params(), FS, N).unwrap();
        let inputs = Array4::<f32>::zeros((1, 3, 1, 100));
        let err = model.logits(inputs.view()).unwrap_err();
        assert!(matches!(err, MlError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_params_serde_tag() {
        let params = ModelParams::SpectralLinear(two_band_params());
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["kind"], "spectral_linear");
        let back: ModelParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
        assert_eq!(back.num_classes(), 2);
    }
}
