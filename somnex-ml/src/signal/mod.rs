//! Signal processing: frequency bands and band-stop filtering of waveform batches.

pub mod band;
pub mod filter;

pub use band::FrequencyBand;
pub use filter::{BandStopFilter, Biquad, SignalFilter, butter_bandstop, filter_batch, sosfilt};
