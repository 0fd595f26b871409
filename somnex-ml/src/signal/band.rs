//! Named frequency intervals.

use crate::error::MlError;
use serde::{Deserialize, Serialize};
use somnex_core::BandSpec;

/// A named frequency interval `[low_hz, high_hz]`.
///
/// Construction only checks what can be checked without a sampling rate;
/// the Nyquist bound is enforced by [`FrequencyBand::check_nyquist`] and by the
/// filter design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    name: String,
    low_hz: f64,
    high_hz: f64,
}

impl FrequencyBand {
    pub fn new(name: impl Into<String>, low_hz: f64, high_hz: f64) -> Result<Self, MlError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(MlError::invalid_band(low_hz, high_hz, "band name is empty"));
        }
        if !low_hz.is_finite() || !high_hz.is_finite() {
            return Err(MlError::invalid_band(
                low_hz,
                high_hz,
                "band edges must be finite",
            ));
        }
        if low_hz <= 0.0 {
            return Err(MlError::invalid_band(
                low_hz,
                high_hz,
                "low edge must be above 0 Hz",
            ));
        }
        if low_hz >= high_hz {
            return Err(MlError::invalid_band(
                low_hz,
                high_hz,
                "low edge must be below high edge",
            ));
        }
        Ok(Self {
            name,
            low_hz,
            high_hz,
        })
    }

    pub fn from_spec(spec: &BandSpec) -> Result<Self, MlError> {
        Self::new(spec.name.clone(), spec.low_hz, spec.high_hz)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn low_hz(&self) -> f64 {
        self.low_hz
    }

    pub fn high_hz(&self) -> f64 {
        self.high_hz
    }

    pub fn center_hz(&self) -> f64 {
        (self.low_hz * self.high_hz).sqrt()
    }

    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.low_hz && freq_hz <= self.high_hz
    }

    /// The interval as printed in plot titles, e.g. `[8, 12]`.
    pub fn interval_label(&self) -> String {
        format!("[{}, {}]", self.low_hz, self.high_hz)
    }

    pub fn check_nyquist(&self, sampling_rate: f64) -> Result<(), MlError> {
        if !sampling_rate.is_finite() || sampling_rate <= 0.0 {
            return Err(MlError::invalid_band(
                self.low_hz,
                self.high_hz,
                format!("sampling rate {sampling_rate} Hz is not positive"),
            ));
        }
        let nyquist = 0.5 * sampling_rate;
        if self.high_hz >= nyquist {
            return Err(MlError::invalid_band(
                self.low_hz,
                self.high_hz,
                format!("high edge must be below the Nyquist frequency {nyquist} Hz"),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for FrequencyBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} Hz", self.name, self.interval_label())
    }
}
