// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Windowed power spectrum with Welch-style averaging and exponential smoothing.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::num_complex::Complex as FftComplex;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;

use h1sdr_core::config::{validate_fft_size, DEFAULT_FFT_SIZE, DEFAULT_SMOOTHING};
use h1sdr_core::model::unix_millis;
use h1sdr_core::{ConfigurationError, PipelineConfig, SpectrumResult, WindowKind};

use crate::window::window_coeffs;

/// Linear power floor before the dB conversion (-100 dB).
pub const POWER_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumSettings {
    pub fft_size: usize,
    pub window: WindowKind,
    /// Weight of the newest spectrum in the running average, `(0, 1]`.
    pub smoothing: f32,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            window: WindowKind::Hann,
            smoothing: DEFAULT_SMOOTHING,
        }
    }
}

impl From<&PipelineConfig> for SpectrumSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            fft_size: config.fft_size,
            window: config.window,
            smoothing: config.smoothing,
        }
    }
}

impl SpectrumSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_fft_size(self.fft_size)?;
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(ConfigurationError::Invalid(format!(
                "smoothing factor {} outside (0, 1]",
                self.smoothing
            )));
        }
        Ok(())
    }
}

/// Summary of the estimator's current geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumInfo {
    pub fft_size: usize,
    pub window: WindowKind,
    pub smoothing: f32,
    pub sample_rate: f64,
    pub center_frequency: f64,
    /// Bin width in Hz.
    pub resolution: f64,
    pub span: f64,
    pub min_freq: f64,
    pub max_freq: f64,
}

pub struct SpectrumEstimator {
    settings: SpectrumSettings,
    planner: FftPlanner<f32>,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    frame: Vec<FftComplex<f32>>,
    scratch: Vec<FftComplex<f32>>,
    sample_rate: f64,
    center_freq: f64,
    frequencies: Vec<f64>,
    previous: Option<Vec<f32>>,
}

impl SpectrumEstimator {
    pub fn new(
        settings: SpectrumSettings,
        sample_rate: f64,
        center_freq: f64,
    ) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(settings.fft_size);
        let scratch = vec![FftComplex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let mut estimator = Self {
            settings,
            planner,
            fft,
            window: window_coeffs(settings.window, settings.fft_size),
            frame: vec![FftComplex::new(0.0, 0.0); settings.fft_size],
            scratch,
            sample_rate,
            center_freq,
            frequencies: Vec::new(),
            previous: None,
        };
        estimator.rebuild_axis();
        Ok(estimator)
    }

    pub fn settings(&self) -> SpectrumSettings {
        self.settings
    }

    pub fn fft_size(&self) -> usize {
        self.settings.fft_size
    }

    /// Apply new settings. On error nothing changes.
    ///
    /// A new FFT size re-plans the transform and drops the smoothing history;
    /// a new window or smoothing factor keeps it.
    pub fn reconfigure(&mut self, settings: SpectrumSettings) -> Result<(), ConfigurationError> {
        settings.validate()?;
        let size_changed = settings.fft_size != self.settings.fft_size;
        let window_changed = settings.window != self.settings.window;
        self.settings = settings;

        if size_changed {
            self.fft = self.planner.plan_fft_forward(settings.fft_size);
            self.scratch = vec![FftComplex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
            self.frame = vec![FftComplex::new(0.0, 0.0); settings.fft_size];
            self.previous = None;
            self.rebuild_axis();
        }
        if size_changed || window_changed {
            self.window = window_coeffs(settings.window, settings.fft_size);
        }
        Ok(())
    }

    /// Forget the smoothing history.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Estimate the power spectrum of one chunk.
    ///
    /// Chunks shorter than the FFT are zero-padded. Longer chunks are split
    /// into 50 %-overlapping frames whose linear power is averaged before the
    /// dB conversion. The result is smoothed against the previous spectrum
    /// unless the FFT size or sample rate changed since then.
    pub fn process(
        &mut self,
        samples: &[Complex<f32>],
        sample_rate: f64,
        center_freq: f64,
    ) -> SpectrumResult {
        self.retune(sample_rate, center_freq);

        let n = self.settings.fft_size;
        let half = n / 2;
        let power = self.average_power(samples);
        let raw = power[half..]
            .iter()
            .chain(power[..half].iter())
            .map(|&p| (10.0 * p.max(POWER_FLOOR).log10()) as f32);

        let alpha = self.settings.smoothing;
        let smoothed: Vec<f32> = match self.previous.take() {
            Some(prev) if prev.len() == n => raw
                .zip(prev)
                .map(|(new, old)| alpha * new + (1.0 - alpha) * old)
                .collect(),
            _ => raw.collect(),
        };
        self.previous = Some(smoothed.clone());

        SpectrumResult {
            frequencies: self.frequencies.clone(),
            power_db: smoothed,
            timestamp_ms: unix_millis(),
            sample_rate,
            center_freq,
            fft_size: n,
        }
    }

    /// Absolute frequency of shifted bin `index`.
    pub fn bin_frequency(&self, index: usize) -> f64 {
        let n = self.settings.fft_size as f64;
        self.center_freq + (index as f64 - n / 2.0) * self.sample_rate / n
    }

    /// Shifted bin nearest to `freq`, or `None` outside the displayed span.
    pub fn frequency_bin(&self, freq: f64) -> Option<usize> {
        let n = self.settings.fft_size as f64;
        if self.sample_rate <= 0.0 {
            return None;
        }
        let bin = ((freq - self.center_freq) * n / self.sample_rate + n / 2.0).round();
        (bin >= 0.0 && bin < n).then_some(bin as usize)
    }

    pub fn info(&self) -> SpectrumInfo {
        let n = self.settings.fft_size;
        let resolution = self.sample_rate / n as f64;
        SpectrumInfo {
            fft_size: n,
            window: self.settings.window,
            smoothing: self.settings.smoothing,
            sample_rate: self.sample_rate,
            center_frequency: self.center_freq,
            resolution,
            span: self.sample_rate,
            min_freq: self.bin_frequency(0),
            max_freq: self.bin_frequency(n - 1),
        }
    }

    fn retune(&mut self, sample_rate: f64, center_freq: f64) {
        if sample_rate != self.sample_rate {
            self.previous = None;
        }
        if sample_rate != self.sample_rate || center_freq != self.center_freq {
            self.sample_rate = sample_rate;
            self.center_freq = center_freq;
            self.rebuild_axis();
        }
    }

    fn rebuild_axis(&mut self) {
        self.frequencies = (0..self.settings.fft_size)
            .map(|i| self.bin_frequency(i))
            .collect();
    }

    /// Mean linear power per unshifted FFT bin.
    fn average_power(&mut self, samples: &[Complex<f32>]) -> Vec<f64> {
        let n = self.settings.fft_size;
        let mut acc = vec![0.0_f64; n];
        if samples.len() <= n {
            self.accumulate_frame(samples, &mut acc);
            return acc;
        }

        let hop = n / 2;
        let frames = (samples.len() - n) / hop + 1;
        for idx in 0..frames {
            let start = idx * hop;
            self.accumulate_frame(&samples[start..start + n], &mut acc);
        }
        let inv = 1.0 / frames as f64;
        for p in &mut acc {
            *p *= inv;
        }
        acc
    }

    fn accumulate_frame(&mut self, frame: &[Complex<f32>], acc: &mut [f64]) {
        for (i, (slot, &w)) in self.frame.iter_mut().zip(self.window.iter()).enumerate() {
            *slot = match frame.get(i) {
                Some(s) => FftComplex::new(s.re * w, s.im * w),
                None => FftComplex::new(0.0, 0.0),
            };
        }
        self.fft.process_with_scratch(&mut self.frame, &mut self.scratch);
        for (p, bin) in acc.iter_mut().zip(self.frame.iter()) {
            *p += (bin.re as f64).powi(2) + (bin.im as f64).powi(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn tone(offset_hz: f64, sample_rate: f64, amplitude: f32, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|n| {
                let phase = TAU * offset_hz * n as f64 / sample_rate;
                Complex::from_polar(amplitude, phase as f32)
            })
            .collect()
    }

    /// Deterministic white-ish noise from a 64-bit LCG.
    fn noise(len: usize, seed: u64) -> Vec<Complex<f32>> {
        let mut state = seed;
        let mut next = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 40) as f32 / (1u64 << 24) as f32) - 0.5
        };
        (0..len).map(|_| Complex::new(next(), next())).collect()
    }

    fn estimator(fft_size: usize, smoothing: f32) -> SpectrumEstimator {
        SpectrumEstimator::new(
            SpectrumSettings {
                fft_size,
                window: WindowKind::Hann,
                smoothing,
            },
            2.4e6,
            100e6,
        )
        .unwrap()
    }

    #[test]
    fn test_output_shape_for_any_chunk_length() {
        for &fft_size in &[16usize, 256, 2048] {
            for &len in &[1usize, fft_size / 2, fft_size, fft_size * 3 + 7] {
                let mut est = estimator(fft_size, 0.3);
                let out = est.process(&noise(len, 7), 2.4e6, 100e6);
                assert_eq!(out.power_db.len(), fft_size);
                assert_eq!(out.frequencies.len(), fft_size);
                assert_eq!(out.fft_size, fft_size);
                assert!(out.frequencies.windows(2).all(|w| w[1] > w[0]));
            }
        }
    }

    #[test]
    fn test_center_bin_maps_to_center_frequency() {
        let mut est = estimator(1024, 0.3);
        let out = est.process(&vec![Complex::new(0.0, 0.0); 1024], 2.4e6, 433.92e6);
        assert_eq!(out.frequencies[512], 433.92e6);
        assert!((out.bin_width() - 2.4e6 / 1024.0).abs() < 1e-6);
        assert!((out.frequencies[0] - (433.92e6 - 1.2e6)).abs() < 1e-3);
    }

    #[test]
    fn test_silence_sits_on_floor() {
        let mut est = estimator(512, 0.3);
        let out = est.process(&vec![Complex::new(0.0, 0.0); 2000], 2.4e6, 100e6);
        for (idx, &db) in out.power_db.iter().enumerate() {
            assert!((db + 100.0).abs() < 1e-4, "bin {idx}: {db}");
        }
    }

    #[test]
    fn test_repeated_chunk_converges_to_raw_spectrum() {
        let chunk = noise(4096, 42);

        let mut fresh = estimator(1024, 0.3);
        let raw = fresh.process(&chunk, 2.4e6, 100e6);

        let mut est = estimator(1024, 0.3);
        est.process(&noise(4096, 1234), 2.4e6, 100e6);
        let mut last = None;
        for _ in 0..60 {
            last = Some(est.process(&chunk, 2.4e6, 100e6));
        }
        let last = last.unwrap();
        for (idx, (a, b)) in last.power_db.iter().zip(raw.power_db.iter()).enumerate() {
            assert!((a - b).abs() < 1e-3, "bin {idx}: {a} vs {b}");
        }
    }

    #[test]
    fn test_tone_peak_within_one_bin() {
        let sr = 2.4e6;
        let mut est = estimator(2048, 1.0);
        for &offset in &[-500e3, -12_345.0, 0.0, 200e3, 1.0e6] {
            let out = est.process(&tone(offset, sr, 0.5, 2048), sr, 100e6);
            let (peak_freq, _) = out.peak().unwrap();
            assert!(
                (peak_freq - (100e6 + offset)).abs() <= out.bin_width() * 1.0001,
                "offset {offset}: peak at {peak_freq}"
            );
        }
    }

    #[test]
    fn test_long_chunk_peak_near_tone() {
        let sr = 2.4e6;
        let mut est = estimator(2048, 0.3);
        let out = est.process(&tone(50e3, sr, 0.5, 240_000), sr, 100e6);
        let (peak_freq, peak_db) = out.peak().unwrap();
        assert!((peak_freq - 100.05e6).abs() <= 2.0 * out.bin_width());
        assert!(peak_db > 0.0);
    }

    #[test]
    fn test_long_chunk_averages_linear_power() {
        let n = 256;
        let chunk = noise(n * 2, 99);

        // Three frames: [0, n), [n/2, 3n/2), [n, 2n)
        let mut frames = Vec::new();
        for start in [0, n / 2, n] {
            let mut est = estimator(n, 1.0);
            frames.push(est.process(&chunk[start..start + n], 2.4e6, 100e6).power_db);
        }

        let mut est = estimator(n, 1.0);
        let averaged = est.process(&chunk, 2.4e6, 100e6);
        for bin in 0..n {
            let mean_linear: f64 = frames
                .iter()
                .map(|f| 10f64.powf(f[bin] as f64 / 10.0))
                .sum::<f64>()
                / 3.0;
            let expected = 10.0 * mean_linear.log10();
            assert!(
                (averaged.power_db[bin] as f64 - expected).abs() < 1e-2,
                "bin {bin}: {} vs {expected}",
                averaged.power_db[bin]
            );
        }
    }

    #[test]
    fn test_smoothing_applies_between_calls() {
        let mut est = estimator(64, 0.5);
        let quiet = est.process(&vec![Complex::new(0.0, 0.0); 64], 2.4e6, 100e6);
        let loud_raw = estimator(64, 1.0).process(&noise(64, 3), 2.4e6, 100e6);
        let mixed = est.process(&noise(64, 3), 2.4e6, 100e6);
        for bin in 0..64 {
            let expected = 0.5 * loud_raw.power_db[bin] + 0.5 * quiet.power_db[bin];
            assert!((mixed.power_db[bin] - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn test_sample_rate_change_resets_smoothing() {
        let mut est = estimator(64, 0.3);
        est.process(&vec![Complex::new(0.0, 0.0); 64], 2.4e6, 100e6);
        let raw = estimator(64, 1.0).process(&noise(64, 5), 1.2e6, 100e6);
        let out = est.process(&noise(64, 5), 1.2e6, 100e6);
        assert_eq!(out.power_db, raw.power_db);
        assert_eq!(out.sample_rate, 1.2e6);
    }

    #[test]
    fn test_center_change_moves_axis_only() {
        let mut est = estimator(64, 0.3);
        est.process(&noise(64, 5), 2.4e6, 100e6);
        let out = est.process(&noise(64, 5), 2.4e6, 145e6);
        assert_eq!(out.frequencies[32], 145e6);
        // History kept, so the result equals the (identical) raw spectrum.
        let raw = estimator(64, 1.0).process(&noise(64, 5), 2.4e6, 145e6);
        for (a, b) in out.power_db.iter().zip(raw.power_db.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_reconfigure_fft_size() {
        let mut est = estimator(1024, 0.3);
        est.process(&noise(1024, 1), 2.4e6, 100e6);
        est.reconfigure(SpectrumSettings {
            fft_size: 4096,
            window: WindowKind::Blackman,
            smoothing: 0.3,
        })
        .unwrap();
        let out = est.process(&noise(1024, 1), 2.4e6, 100e6);
        assert_eq!(out.power_db.len(), 4096);
        assert_eq!(est.info().window, WindowKind::Blackman);
    }

    #[test]
    fn test_reconfigure_rejects_invalid_size() {
        let mut est = estimator(1024, 0.3);
        for bad in [0usize, 8, 1000, 32_768] {
            let err = est
                .reconfigure(SpectrumSettings {
                    fft_size: bad,
                    ..est.settings()
                })
                .unwrap_err();
            assert_eq!(err, ConfigurationError::FftSize(bad));
        }
        assert_eq!(est.fft_size(), 1024);
        assert!(SpectrumEstimator::new(
            SpectrumSettings {
                fft_size: 100,
                ..SpectrumSettings::default()
            },
            2.4e6,
            100e6
        )
        .is_err());
    }

    #[test]
    fn test_bin_frequency_roundtrip_and_bounds() {
        let est = estimator(2048, 0.3);
        assert_eq!(est.frequency_bin(100e6), Some(1024));
        assert_eq!(est.frequency_bin(est.bin_frequency(17)), Some(17));
        assert_eq!(est.frequency_bin(90e6), None);
        let info = est.info();
        assert_eq!(info.span, 2.4e6);
        assert!((info.min_freq - 98.8e6).abs() < 1e-3);
    }
}
