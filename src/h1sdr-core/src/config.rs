// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Versioned pipeline configuration snapshot.
//!
//! A `PipelineConfig` is only ever replaced whole: callers build a candidate,
//! run [`PipelineConfig::validate`], then publish it with a bumped `version`.
//! Stages compare `version` against the last snapshot they applied.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::model::{DemodMode, TunerSettings, WindowKind};

pub const MIN_FFT_SIZE: usize = 16;
pub const MAX_FFT_SIZE: usize = 16_384;
pub const DEFAULT_FFT_SIZE: usize = 4_096;
pub const DEFAULT_SMOOTHING: f32 = 0.3;
pub const DEFAULT_SAMPLE_RATE: f64 = 2.4e6;
pub const DEFAULT_CENTER_FREQ: f64 = 100e6;
pub const DEFAULT_GAIN_DB: f64 = 40.0;
pub const DEFAULT_AUDIO_RATE: u32 = 48_000;
pub const DEFAULT_FM_DEVIATION: f64 = 75_000.0;
pub const DEFAULT_CW_TONE: f64 = 600.0;
pub const MIN_AUDIO_RATE: u32 = 8_000;
pub const MAX_AUDIO_RATE: u32 = 192_000;

/// Hardware envelope the configuration is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLimits {
    pub min_freq_hz: f64,
    pub max_freq_hz: f64,
    pub max_sample_rate: f64,
    pub min_gain_db: f64,
    pub max_gain_db: f64,
    pub max_ppm: i32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        // RTL-SDR class tuner.
        Self {
            min_freq_hz: 24e6,
            max_freq_hz: 1_766e6,
            max_sample_rate: 3.2e6,
            min_gain_db: 0.0,
            max_gain_db: 50.0,
            max_ppm: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub sample_rate: f64,
    pub center_freq: f64,
    pub gain_db: f64,
    pub ppm_correction: i32,
    pub fft_size: usize,
    pub window: WindowKind,
    /// Exponential smoothing factor applied to successive spectra.
    pub smoothing: f32,
    pub demod_mode: DemodMode,
    /// Explicit audio bandwidth; `None` uses the mode default.
    pub demod_bandwidth: Option<f64>,
    pub fm_deviation: f64,
    pub cw_tone: f64,
    pub audio_rate: u32,
    /// Restart the AGC envelope on every chunk instead of carrying it forward.
    pub agc_reset_per_chunk: bool,
    pub limits: DeviceLimits,
    pub version: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            center_freq: DEFAULT_CENTER_FREQ,
            gain_db: DEFAULT_GAIN_DB,
            ppm_correction: 0,
            fft_size: DEFAULT_FFT_SIZE,
            window: WindowKind::Hann,
            smoothing: DEFAULT_SMOOTHING,
            demod_mode: DemodMode::Spectrum,
            demod_bandwidth: None,
            fm_deviation: DEFAULT_FM_DEVIATION,
            cw_tone: DEFAULT_CW_TONE,
            audio_rate: DEFAULT_AUDIO_RATE,
            agc_reset_per_chunk: false,
            limits: DeviceLimits::default(),
            version: 0,
        }
    }
}

impl PipelineConfig {
    pub fn tuner(&self) -> TunerSettings {
        TunerSettings {
            sample_rate: self.sample_rate,
            center_freq: self.center_freq,
            gain_db: self.gain_db,
            ppm_correction: self.ppm_correction,
        }
    }

    /// Audio bandwidth actually in effect for the current mode.
    pub fn effective_bandwidth(&self) -> Option<f64> {
        self.demod_bandwidth
            .or_else(|| self.demod_mode.default_bandwidth())
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_fft_size(self.fft_size)?;
        validate_center_freq(self.center_freq, &self.limits)?;
        validate_sample_rate(self.sample_rate, &self.limits)?;
        validate_gain(self.gain_db, &self.limits)?;

        if self.ppm_correction.abs() > self.limits.max_ppm {
            return Err(ConfigurationError::PpmOutOfRange {
                ppm: self.ppm_correction,
                max: self.limits.max_ppm,
            });
        }

        if let Some(bw) = self.demod_bandwidth {
            validate_bandwidth(self.demod_mode, bw)?;
        }

        if !(MIN_AUDIO_RATE..=MAX_AUDIO_RATE).contains(&self.audio_rate) {
            return Err(ConfigurationError::Invalid(format!(
                "audio rate {} outside {}..={}",
                self.audio_rate, MIN_AUDIO_RATE, MAX_AUDIO_RATE
            )));
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(ConfigurationError::Invalid(format!(
                "smoothing factor {} outside (0, 1]",
                self.smoothing
            )));
        }
        if !(self.fm_deviation.is_finite() && self.fm_deviation > 0.0) {
            return Err(ConfigurationError::Invalid(format!(
                "FM deviation {} must be > 0",
                self.fm_deviation
            )));
        }
        let tone_max = self.audio_rate as f64 / 2.0;
        if !(self.cw_tone > 0.0 && self.cw_tone < tone_max) {
            return Err(ConfigurationError::Invalid(format!(
                "CW tone {} Hz outside (0, {}) Hz",
                self.cw_tone, tone_max
            )));
        }
        Ok(())
    }
}

pub fn validate_fft_size(n: usize) -> Result<(), ConfigurationError> {
    if n.is_power_of_two() && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&n) {
        Ok(())
    } else {
        Err(ConfigurationError::FftSize(n))
    }
}

pub fn validate_center_freq(hz: f64, limits: &DeviceLimits) -> Result<(), ConfigurationError> {
    if hz.is_finite() && hz >= limits.min_freq_hz && hz <= limits.max_freq_hz {
        Ok(())
    } else {
        Err(ConfigurationError::FrequencyOutOfRange {
            hz,
            min: limits.min_freq_hz,
            max: limits.max_freq_hz,
        })
    }
}

pub fn validate_sample_rate(hz: f64, limits: &DeviceLimits) -> Result<(), ConfigurationError> {
    if hz.is_finite() && hz > 0.0 && hz <= limits.max_sample_rate {
        Ok(())
    } else {
        Err(ConfigurationError::SampleRateOutOfRange {
            hz,
            max: limits.max_sample_rate,
        })
    }
}

pub fn validate_gain(db: f64, limits: &DeviceLimits) -> Result<(), ConfigurationError> {
    if db.is_finite() && db >= limits.min_gain_db && db <= limits.max_gain_db {
        Ok(())
    } else {
        Err(ConfigurationError::GainOutOfRange {
            db,
            min: limits.min_gain_db,
            max: limits.max_gain_db,
        })
    }
}

/// Check an explicit bandwidth against the per-mode table.
/// Bandwidth is ignored in `Spectrum` mode.
pub fn validate_bandwidth(mode: DemodMode, hz: f64) -> Result<(), ConfigurationError> {
    let Some((_, min, max)) = mode.bandwidth_range() else {
        return Ok(());
    };
    if hz.is_finite() && hz >= min && hz <= max {
        Ok(())
    } else {
        Err(ConfigurationError::BandwidthOutOfRange {
            mode: mode.as_str(),
            hz,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.fft_size, 4_096);
        assert_eq!(cfg.audio_rate, 48_000);
        assert_eq!(cfg.effective_bandwidth(), None);
    }

    #[test]
    fn test_fft_size_validation() {
        assert!(validate_fft_size(2_048).is_ok());
        assert!(validate_fft_size(16_384).is_ok());
        assert_eq!(validate_fft_size(3_000), Err(ConfigurationError::FftSize(3_000)));
        assert_eq!(validate_fft_size(32_768), Err(ConfigurationError::FftSize(32_768)));
        assert_eq!(validate_fft_size(8), Err(ConfigurationError::FftSize(8)));
    }

    #[test]
    fn test_range_checks() {
        let limits = DeviceLimits::default();
        assert!(validate_center_freq(100e6, &limits).is_ok());
        assert!(validate_center_freq(1e6, &limits).is_err());
        assert!(validate_center_freq(f64::NAN, &limits).is_err());
        assert!(validate_sample_rate(2.4e6, &limits).is_ok());
        assert!(validate_sample_rate(0.0, &limits).is_err());
        assert!(validate_sample_rate(10e6, &limits).is_err());
        assert!(validate_gain(49.6, &limits).is_ok());
        assert!(validate_gain(-1.0, &limits).is_err());
    }

    #[test]
    fn test_bandwidth_per_mode() {
        assert!(validate_bandwidth(DemodMode::Usb, 2_400.0).is_ok());
        assert!(validate_bandwidth(DemodMode::Usb, 6_000.0).is_err());
        assert!(validate_bandwidth(DemodMode::Cw, 50.0).is_err());
        assert!(validate_bandwidth(DemodMode::Fm, 180_000.0).is_ok());
        assert!(validate_bandwidth(DemodMode::Spectrum, 1.0).is_ok());
    }

    #[test]
    fn test_effective_bandwidth_falls_back_to_mode() {
        let cfg = PipelineConfig {
            demod_mode: DemodMode::Cw,
            ..PipelineConfig::default()
        };
        assert_eq!(cfg.effective_bandwidth(), Some(500.0));

        let cfg = PipelineConfig {
            demod_bandwidth: Some(800.0),
            ..cfg
        };
        assert_eq!(cfg.effective_bandwidth(), Some(800.0));
    }

    #[test]
    fn test_invalid_fields_rejected() {
        let cfg = PipelineConfig {
            ppm_correction: 5_000,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigurationError::PpmOutOfRange { .. })
        ));

        let cfg = PipelineConfig {
            smoothing: 0.0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = PipelineConfig {
            cw_tone: 30_000.0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
