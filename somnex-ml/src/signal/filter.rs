//! Butterworth band-stop filtering in second-order sections.
//!
//! Design follows the classic analog route: Butterworth low-pass prototype,
//! low-pass to band-stop transform, then a pre-warped bilinear transform with the
//! sampling rate normalised to 2. An order-`n` design yields `n` biquads (2n poles).

use crate::error::MlError;
use crate::signal::band::FrequencyBand;
use ndarray::{Array2, Array4, ArrayView1, ArrayView4, s};
use num_complex::Complex64;
use somnex_core::{FilterMode, FilterScope};
use std::f64::consts::PI;

const IMAG_EPS: f64 = 1e-12;

/// One second-order section, `a[0]` normalised to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    fn response(&self, z_inv: Complex64) -> Complex64 {
        let z_inv2 = z_inv * z_inv;
        let num = Complex64::new(self.b[0], 0.0) + z_inv * self.b[1] + z_inv2 * self.b[2];
        let den = Complex64::new(self.a[0], 0.0) + z_inv * self.a[1] + z_inv2 * self.a[2];
        num / den
    }
}

/// Design an order-`order` Butterworth band-stop filter rejecting `[low_hz, high_hz]`.
pub fn butter_bandstop(
    order: usize,
    low_hz: f64,
    high_hz: f64,
    sampling_rate: f64,
) -> Result<Vec<Biquad>, MlError> {
    if order == 0 {
        return Err(MlError::invalid_band(
            low_hz,
            high_hz,
            "filter order must be at least 1",
        ));
    }
    if !sampling_rate.is_finite() || sampling_rate <= 0.0 {
        return Err(MlError::invalid_band(
            low_hz,
            high_hz,
            format!("sampling rate {sampling_rate} Hz is not positive"),
        ));
    }
    let nyquist = 0.5 * sampling_rate;
    if !low_hz.is_finite() || !high_hz.is_finite() || low_hz <= 0.0 || high_hz >= nyquist {
        return Err(MlError::invalid_band(
            low_hz,
            high_hz,
            format!("edges must lie strictly inside (0, {nyquist}) Hz"),
        ));
    }
    if low_hz >= high_hz {
        return Err(MlError::invalid_band(
            low_hz,
            high_hz,
            "low edge must be below high edge",
        ));
    }

    // Pre-warp the normalised edges for the bilinear transform at fs = 2.
    let fs = 2.0;
    let warp = |hz: f64| 2.0 * fs * (PI * (hz / nyquist) / fs).tan();
    let (w1, w2) = (warp(low_hz), warp(high_hz));
    let bw = w2 - w1;
    let wo = (w1 * w2).sqrt();

    let n = order as f64;
    let prototype: Vec<Complex64> = (0..order)
        .map(|k| {
            let m = 1.0 - n + 2.0 * k as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect();

    // Low-pass -> band-stop: every prototype pole splits in two, and the
    // transmission zeros sit at +/- j*wo.
    let half_bw = Complex64::new(bw / 2.0, 0.0);
    let mut poles = Vec::with_capacity(2 * order);
    for &p in &prototype {
        let p_hp = half_bw / p;
        let disc = (p_hp * p_hp - wo * wo).sqrt();
        poles.push(p_hp + disc);
        poles.push(p_hp - disc);
    }
    let analog_zero = Complex64::new(0.0, wo);
    let one = Complex64::new(1.0, 0.0);
    let mut gain = (one / prototype.iter().fold(one, |acc, &p| acc * -p)).re;

    // Bilinear transform.
    let fs2 = Complex64::new(2.0 * fs, 0.0);
    let zero_factor = (fs2 - analog_zero) * (fs2 - analog_zero.conj());
    let num = (0..order).fold(one, |acc, _| acc * zero_factor);
    let den = poles.iter().fold(one, |acc, &p| acc * (fs2 - p));
    gain *= (num / den).re;

    let digital_zero = (fs2 + analog_zero) / (fs2 - analog_zero);
    let digital_poles: Vec<Complex64> = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();

    // Group poles into conjugate pairs; leftover real poles are paired with each other.
    let mut pairs: Vec<(f64, [f64; 3])> = digital_poles
        .iter()
        .filter(|p| p.im > IMAG_EPS)
        .map(|p| (p.norm(), [1.0, -2.0 * p.re, p.norm_sqr()]))
        .collect();
    let reals: Vec<f64> = digital_poles
        .iter()
        .filter(|p| p.im.abs() <= IMAG_EPS)
        .map(|p| p.re)
        .collect();
    for chunk in reals.chunks(2) {
        match chunk {
            [p1, p2] => pairs.push((p1.abs().max(p2.abs()), [1.0, -(p1 + p2), p1 * p2])),
            [p1] => pairs.push((p1.abs(), [1.0, -p1, 0.0])),
            _ => {}
        }
    }
    if pairs.len() != order {
        return Err(MlError::invalid_band(
            low_hz,
            high_hz,
            format!(
                "pole pairing produced {} sections for order {order}",
                pairs.len()
            ),
        ));
    }
    // Poles closest to the unit circle go last.
    pairs.sort_by(|x, y| x.0.total_cmp(&y.0));

    let numerator = [1.0, -2.0 * digital_zero.re, digital_zero.norm_sqr()];
    let mut sections: Vec<Biquad> = pairs
        .into_iter()
        .map(|(_, a)| Biquad { b: numerator, a })
        .collect();
    if let Some(first) = sections.first_mut() {
        for coeff in first.b.iter_mut() {
            *coeff *= gain;
        }
    }
    Ok(sections)
}

/// Run a cascade of biquads over `signal` (transposed direct form II, zero initial state).
pub fn sosfilt(sections: &[Biquad], signal: &[f32]) -> Vec<f32> {
    let mut state = vec![[0.0f64; 2]; sections.len()];
    signal
        .iter()
        .map(|&x| {
            let mut v = x as f64;
            for (sec, z) in sections.iter().zip(state.iter_mut()) {
                let y = sec.b[0] * v + z[0];
                z[0] = sec.b[1] * v - sec.a[1] * y + z[1];
                z[1] = sec.b[2] * v - sec.a[2] * y;
                v = y;
            }
            v as f32
        })
        .collect()
}

/// Magnitude of the cascade's frequency response at `freq_hz`.
pub fn magnitude_response(sections: &[Biquad], freq_hz: f64, sampling_rate: f64) -> f64 {
    let omega = 2.0 * PI * freq_hz / sampling_rate;
    let z_inv = Complex64::from_polar(1.0, -omega);
    sections
        .iter()
        .fold(Complex64::new(1.0, 0.0), |acc, sec| {
            acc * sec.response(z_inv)
        })
        .norm()
}

/// A filter applied to one contiguous 1-D signal. Output length equals input length.
pub trait SignalFilter: Send + Sync {
    fn filter(&self, signal: &[f32]) -> Vec<f32>;
}

/// A designed band-stop filter bound to a band and a sampling rate.
#[derive(Debug, Clone)]
pub struct BandStopFilter {
    band: FrequencyBand,
    sampling_rate: f64,
    mode: FilterMode,
    sections: Vec<Biquad>,
}

impl BandStopFilter {
    pub fn design(
        band: &FrequencyBand,
        sampling_rate: f64,
        order: usize,
        mode: FilterMode,
    ) -> Result<Self, MlError> {
        band.check_nyquist(sampling_rate)?;
        let sections = butter_bandstop(order, band.low_hz(), band.high_hz(), sampling_rate)?;
        Ok(Self {
            band: band.clone(),
            sampling_rate,
            mode,
            sections,
        })
    }

    pub fn band(&self) -> &FrequencyBand {
        &self.band
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Gain at `freq_hz`, including the doubled pass of zero-phase mode.
    pub fn gain_at(&self, freq_hz: f64) -> f64 {
        let single = magnitude_response(&self.sections, freq_hz, self.sampling_rate);
        match self.mode {
            FilterMode::Causal => single,
            FilterMode::ZeroPhase => single * single,
        }
    }
}

impl SignalFilter for BandStopFilter {
    fn filter(&self, signal: &[f32]) -> Vec<f32> {
        match self.mode {
            FilterMode::Causal => sosfilt(&self.sections, signal),
            FilterMode::ZeroPhase => {
                let mut backward = sosfilt(&self.sections, signal);
                backward.reverse();
                let mut out = sosfilt(&self.sections, &backward);
                out.reverse();
                out
            }
        }
    }
}

/// Produce a filtered copy of a `(batch, seq, channel, sample)` batch.
///
/// With [`FilterScope::Sequence`] the windows of each sample/channel are
/// concatenated into one signal before filtering, so transients cross window
/// boundaries. [`FilterScope::Window`] filters each window separately.
pub fn filter_batch<F: SignalFilter + ?Sized>(
    inputs: ArrayView4<'_, f32>,
    filter: &F,
    scope: FilterScope,
) -> Result<Array4<f32>, MlError> {
    let (batch, seq_len, channels, n_times) = inputs.dim();
    let mut filtered = Array4::<f32>::zeros(inputs.raw_dim());

    for b in 0..batch {
        for c in 0..channels {
            match scope {
                FilterScope::Sequence => {
                    let sequence = inputs.slice(s![b, .., c, ..]);
                    let signal: Vec<f32> = sequence.iter().copied().collect();
                    let out = filter.filter(&signal);
                    if out.len() != signal.len() {
                        return Err(MlError::shape("filter output", signal.len(), out.len()));
                    }
                    let out = Array2::from_shape_vec((seq_len, n_times), out)?;
                    filtered.slice_mut(s![b, .., c, ..]).assign(&out);
                }
                FilterScope::Window => {
                    for w in 0..seq_len {
                        let window = inputs.slice(s![b, w, c, ..]).to_vec();
                        let out = filter.filter(&window);
                        if out.len() != n_times {
                            return Err(MlError::shape("filter output", n_times, out.len()));
                        }
                        filtered
                            .slice_mut(s![b, w, c, ..])
                            .assign(&ArrayView1::from(&out[..]));
                    }
                }
            }
        }
    }
    Ok(filtered)
}
