// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! AM / FM / SSB / CW demodulation to a fixed audio rate.

mod am;
mod cw;
mod fm;
mod ssb;

use num_complex::Complex;
use serde::Serialize;
use tracing::warn;

use h1sdr_core::config::{DEFAULT_AUDIO_RATE, DEFAULT_CW_TONE, DEFAULT_FM_DEVIATION};
use h1sdr_core::{DemodMode, PipelineConfig};

use crate::agc::{AgcProfile, SoftAgc};
use crate::cache::{CacheStats, FilterCache};
use crate::resample::{resample_with, resampled_len};

pub use ssb::Sideband;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemodSettings {
    pub mode: DemodMode,
    /// Requested audio bandwidth; `None` uses the mode default.
    pub bandwidth: Option<f64>,
    pub fm_deviation: f64,
    pub cw_tone: f64,
    pub audio_rate: u32,
    pub agc_reset_per_chunk: bool,
}

impl Default for DemodSettings {
    fn default() -> Self {
        Self {
            mode: DemodMode::Spectrum,
            bandwidth: None,
            fm_deviation: DEFAULT_FM_DEVIATION,
            cw_tone: DEFAULT_CW_TONE,
            audio_rate: DEFAULT_AUDIO_RATE,
            agc_reset_per_chunk: false,
        }
    }
}

impl From<&PipelineConfig> for DemodSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            mode: config.demod_mode,
            bandwidth: config.demod_bandwidth,
            fm_deviation: config.fm_deviation,
            cw_tone: config.cw_tone,
            audio_rate: config.audio_rate,
            agc_reset_per_chunk: config.agc_reset_per_chunk,
        }
    }
}

impl DemodSettings {
    /// Bandwidth in effect, clamped to the mode's supported range.
    pub fn effective_bandwidth(&self) -> Option<f64> {
        let (default, min, max) = self.mode.bandwidth_range()?;
        let requested = self.bandwidth.filter(|bw| bw.is_finite()).unwrap_or(default);
        Some(requested.clamp(min, max))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemodulatorInfo {
    pub mode: DemodMode,
    pub available_modes: Vec<DemodMode>,
    pub bandwidth: Option<f64>,
    pub audio_rate: u32,
    pub fm_deviation: f64,
    pub cw_tone: f64,
    pub agc_gain: f32,
    pub numerical_failures: u64,
    pub filter_cache: CacheStats,
}

pub struct DemodulatorBank {
    settings: DemodSettings,
    filters: FilterCache,
    agc: SoftAgc,
    cw_phase: f64,
    failures: u64,
}

impl Default for DemodulatorBank {
    fn default() -> Self {
        Self::new(DemodSettings::default())
    }
}

impl DemodulatorBank {
    pub fn new(settings: DemodSettings) -> Self {
        Self {
            settings,
            filters: FilterCache::default(),
            agc: build_agc(&settings),
            cw_phase: 0.0,
            failures: 0,
        }
    }

    pub fn settings(&self) -> &DemodSettings {
        &self.settings
    }

    pub fn mode(&self) -> DemodMode {
        self.settings.mode
    }

    /// Switch settings. A mode or audio-rate change restarts the AGC;
    /// a mode change also restarts the CW beat oscillator.
    pub fn apply(&mut self, settings: DemodSettings) {
        let mode_changed = settings.mode != self.settings.mode;
        if mode_changed || settings.audio_rate != self.settings.audio_rate {
            self.agc = build_agc(&settings);
        }
        if mode_changed {
            self.cw_phase = 0.0;
        }
        self.settings = settings;
    }

    pub fn set_mode(&mut self, mode: DemodMode, bandwidth: Option<f64>) {
        self.apply(DemodSettings {
            mode,
            bandwidth,
            ..self.settings
        });
    }

    /// Demodulate one chunk of baseband IQ at `sample_rate` into audio at
    /// the configured audio rate.
    ///
    /// Returns an empty vector in `Spectrum` mode. If the chain produces a
    /// non-finite sample the whole chunk is replaced by silence of the
    /// expected length.
    pub fn demodulate(&mut self, samples: &[Complex<f32>], sample_rate: f64) -> Vec<f32> {
        let mode = self.settings.mode;
        if !mode.is_audio()
            || samples.is_empty()
            || !(sample_rate.is_finite() && sample_rate > 0.0)
        {
            return Vec::new();
        }
        let audio_rate = self.settings.audio_rate as f64;
        let expected = resampled_len(samples.len(), sample_rate, audio_rate);
        let Some(bandwidth) = self.settings.effective_bandwidth() else {
            return vec![0.0; expected];
        };

        let baseband = match mode {
            DemodMode::Am => am::demodulate(samples, sample_rate, bandwidth, &mut self.filters),
            DemodMode::Fm => fm::demodulate(
                samples,
                sample_rate,
                bandwidth,
                self.settings.fm_deviation,
                &mut self.filters,
            ),
            DemodMode::Usb => ssb::demodulate(
                samples,
                Sideband::Upper,
                sample_rate,
                bandwidth,
                &mut self.filters,
            ),
            DemodMode::Lsb => ssb::demodulate(
                samples,
                Sideband::Lower,
                sample_rate,
                bandwidth,
                &mut self.filters,
            ),
            DemodMode::Cw => cw::demodulate(
                samples,
                sample_rate,
                self.settings.cw_tone,
                bandwidth,
                &mut self.cw_phase,
                &mut self.filters,
            ),
            DemodMode::Spectrum => return Vec::new(),
        };

        let mut audio = resample_with(&baseband, sample_rate, audio_rate, &mut self.filters);
        audio.resize(expected, 0.0);

        if let Some(index) = audio.iter().position(|s| !s.is_finite()) {
            self.failures += 1;
            warn!(
                mode = %mode,
                index,
                len = samples.len(),
                "non-finite demodulator output, emitting silence"
            );
            return vec![0.0; expected];
        }

        if self.settings.agc_reset_per_chunk {
            self.agc.reset();
        }
        self.agc.process_block(&mut audio);
        audio
    }

    pub fn info(&self) -> DemodulatorInfo {
        DemodulatorInfo {
            mode: self.settings.mode,
            available_modes: DemodMode::AUDIO_MODES.to_vec(),
            bandwidth: self.settings.effective_bandwidth(),
            audio_rate: self.settings.audio_rate,
            fm_deviation: self.settings.fm_deviation,
            cw_tone: self.settings.cw_tone,
            agc_gain: self.agc.gain(),
            numerical_failures: self.failures,
            filter_cache: self.filters.stats(),
        }
    }
}

fn build_agc(settings: &DemodSettings) -> SoftAgc {
    SoftAgc::with_profile(
        settings.audio_rate as f32,
        AgcProfile::for_mode(settings.mode),
    )
}

/// Subtract the chunk mean (computed in `f64`).
pub(crate) fn remove_mean(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64;
    for v in values {
        *v = (*v as f64 - mean) as f32;
    }
}
