// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Error taxonomy shared by the DSP, pipeline and server crates.
//!
//! - [`HardwareError`] escalates through the acquisition state machine.
//! - [`ProcessingError`] stays inside a single stage for a single cycle.
//! - [`ConfigurationError`] is returned before any state is touched.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by an IQ source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HardwareError {
    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("read failed: {0}")]
    Read(String),

    #[error("sample buffer overflow")]
    Overflow,

    #[error("failed to set {param}: {reason}")]
    Configure { param: &'static str, reason: String },

    #[error("device disconnected: {0}")]
    Disconnected(String),
}

impl HardwareError {
    pub fn configure(param: &'static str, reason: impl Into<String>) -> Self {
        Self::Configure {
            param,
            reason: reason.into(),
        }
    }

    /// Transient errors are retried by the read loop without leaving `Running`.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Read(_) | Self::Overflow)
    }
}

/// Numerical or input failure inside a processing stage.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessingError {
    #[error("input contains non-finite sample at index {index}")]
    NonFiniteInput { index: usize },

    #[error("input chunk is empty")]
    EmptyInput,

    #[error("invalid bandwidth {0} Hz")]
    InvalidBandwidth(f64),

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("stage reconfiguration failed: {0}")]
    Config(#[from] ConfigurationError),
}

/// Rejected configuration request. The previous configuration stays in effect.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error(
        "FFT size {0} must be a power of two in {min}..={max}",
        min = crate::config::MIN_FFT_SIZE,
        max = crate::config::MAX_FFT_SIZE
    )]
    FftSize(usize),

    #[error("center frequency {hz} Hz outside {min}..={max} Hz")]
    FrequencyOutOfRange { hz: f64, min: f64, max: f64 },

    #[error("sample rate {hz} Hz outside (0, {max}] Hz")]
    SampleRateOutOfRange { hz: f64, max: f64 },

    #[error("gain {db} dB outside {min}..={max} dB")]
    GainOutOfRange { db: f64, min: f64, max: f64 },

    #[error("ppm correction {ppm} outside -{max}..={max}")]
    PpmOutOfRange { ppm: i32, max: i32 },

    #[error("{mode} bandwidth {hz} Hz outside {min}..={max} Hz")]
    BandwidthOutOfRange {
        mode: &'static str,
        hz: f64,
        min: f64,
        max: f64,
    },

    #[error("unknown band preset '{0}'")]
    UnknownBand(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(HardwareError::Timeout(Duration::from_millis(100)).is_transient());
        assert!(HardwareError::Read("usb glitch".into()).is_transient());
        assert!(HardwareError::Overflow.is_transient());
        assert!(!HardwareError::Disconnected("unplugged".into()).is_transient());
        assert!(!HardwareError::Unavailable("no device".into()).is_transient());
        assert!(!HardwareError::configure("frequency", "out of range").is_transient());
    }

    #[test]
    fn test_fft_size_message_names_bounds() {
        let msg = ConfigurationError::FftSize(1000).to_string();
        assert!(msg.contains("1000"));
        assert!(msg.contains("16384"));
    }

    #[test]
    fn test_processing_error_from_config() {
        let err: ProcessingError = ConfigurationError::FftSize(3).into();
        assert!(matches!(err, ProcessingError::Config(ConfigurationError::FftSize(3))));
    }
}
