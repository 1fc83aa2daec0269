// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! IQ source abstraction and synthetic sources.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use num_complex::Complex;

use h1sdr_core::{HardwareError, SampleChunk, TunerSettings};

/// Abstraction over any IQ sample source (real SoapySDR device or synthetic).
pub trait IqSource: Send + 'static {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Apply sample rate, center frequency, gain and ppm correction.
    fn configure(&mut self, settings: &TunerSettings) -> Result<(), HardwareError>;

    /// Blocking read of `len` samples tagged with the current tuning.
    fn read_chunk(&mut self, len: usize) -> Result<SampleChunk, HardwareError>;

    /// Release the device. Called once from the read thread on exit.
    fn close(&mut self) {}
}

/// Sleeps so that reads advance no faster than the sample clock.
#[derive(Debug, Default)]
struct Pacer {
    next: Option<Instant>,
}

impl Pacer {
    fn wait(&mut self, span: Duration) {
        let now = Instant::now();
        let deadline = match self.next {
            // Resync after a stall instead of bursting to catch up.
            Some(next) if next + span > now => next,
            _ => now,
        };
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next = Some(deadline + span);
    }
}

fn chunk_span(len: usize, sample_rate: f64) -> Duration {
    if sample_rate > 0.0 {
        Duration::from_secs_f64(len as f64 / sample_rate)
    } else {
        Duration::ZERO
    }
}

fn not_configured() -> HardwareError {
    HardwareError::Unavailable("source not configured".into())
}

/// IQ source that produces silence (all zeros). Used when no SDR hardware is present.
pub struct MockIqSource {
    settings: Option<TunerSettings>,
    pacer: Option<Pacer>,
}

impl Default for MockIqSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIqSource {
    /// Paced to real time.
    pub fn new() -> Self {
        Self {
            settings: None,
            pacer: Some(Pacer::default()),
        }
    }

    /// Returns chunks as fast as they are requested.
    pub fn unthrottled() -> Self {
        Self {
            settings: None,
            pacer: None,
        }
    }
}

impl IqSource for MockIqSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn configure(&mut self, settings: &TunerSettings) -> Result<(), HardwareError> {
        self.settings = Some(*settings);
        Ok(())
    }

    fn read_chunk(&mut self, len: usize) -> Result<SampleChunk, HardwareError> {
        let settings = self.settings.ok_or_else(not_configured)?;
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait(chunk_span(len, settings.sample_rate));
        }
        Ok(SampleChunk::new(
            vec![Complex::new(0.0, 0.0); len],
            settings.sample_rate,
            settings.center_freq,
        ))
    }
}

/// Synthetic carrier at a fixed offset from the tuned center, with optional
/// uniform noise and scripted read failures.
pub struct ToneIqSource {
    settings: Option<TunerSettings>,
    offset_hz: f64,
    amplitude: f32,
    noise_amplitude: f32,
    phase: f64,
    rng: u64,
    pacer: Option<Pacer>,
    reads: u64,
    failures: BTreeMap<u64, HardwareError>,
    closed: Arc<AtomicBool>,
}

impl ToneIqSource {
    pub fn new(offset_hz: f64, amplitude: f32) -> Self {
        Self {
            settings: None,
            offset_hz,
            amplitude,
            noise_amplitude: 0.0,
            phase: 0.0,
            rng: 0x2545_f491_4f6c_dd1d,
            pacer: Some(Pacer::default()),
            reads: 0,
            failures: BTreeMap::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_noise(mut self, amplitude: f32) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    pub fn unthrottled(mut self) -> Self {
        self.pacer = None;
        self
    }

    /// Fail the read with index `read` (0-based, counting failed reads too).
    pub fn with_failure_at(mut self, read: u64, error: HardwareError) -> Self {
        self.failures.insert(read, error);
        self
    }

    /// Flag set once [`IqSource::close`] has run.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    fn next_noise(&mut self) -> f32 {
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        ((self.rng >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    }
}

impl IqSource for ToneIqSource {
    fn name(&self) -> &str {
        "tone"
    }

    fn configure(&mut self, settings: &TunerSettings) -> Result<(), HardwareError> {
        if settings.sample_rate > 0.0 && self.offset_hz.abs() >= settings.sample_rate / 2.0 {
            return Err(HardwareError::configure(
                "tone offset",
                format!(
                    "{} Hz outside ±{} Hz",
                    self.offset_hz,
                    settings.sample_rate / 2.0
                ),
            ));
        }
        self.settings = Some(*settings);
        Ok(())
    }

    fn read_chunk(&mut self, len: usize) -> Result<SampleChunk, HardwareError> {
        let index = self.reads;
        self.reads += 1;
        if let Some(err) = self.failures.remove(&index) {
            return Err(err);
        }
        let settings = self.settings.ok_or_else(not_configured)?;
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait(chunk_span(len, settings.sample_rate));
        }

        let step = TAU * self.offset_hz / settings.sample_rate;
        let mut samples = Vec::with_capacity(len);
        for n in 0..len {
            let (sin, cos) = (self.phase + step * n as f64).sin_cos();
            let mut s = Complex::new(cos as f32, sin as f32) * self.amplitude;
            if self.noise_amplitude > 0.0 {
                let re = self.next_noise();
                let im = self.next_noise();
                s += Complex::new(re, im) * self.noise_amplitude;
            }
            samples.push(s);
        }
        self.phase = (self.phase + step * len as f64).rem_euclid(TAU);

        Ok(SampleChunk::new(
            samples,
            settings.sample_rate,
            settings.center_freq,
        ))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuner(sample_rate: f64) -> TunerSettings {
        TunerSettings {
            sample_rate,
            center_freq: 100e6,
            gain_db: 30.0,
            ppm_correction: 0,
        }
    }

    #[test]
    fn mock_iq_source_fills_zeros() {
        let mut src = MockIqSource::unthrottled();
        src.configure(&tuner(2.4e6)).unwrap();
        let chunk = src.read_chunk(64).unwrap();
        assert_eq!(chunk.len(), 64);
        assert_eq!(chunk.sample_rate(), 2.4e6);
        assert_eq!(chunk.center_freq(), 100e6);
        assert!(chunk.samples().iter().all(|s| s.re == 0.0 && s.im == 0.0));
    }

    #[test]
    fn mock_requires_configuration() {
        let mut src = MockIqSource::unthrottled();
        assert!(matches!(src.read_chunk(16), Err(HardwareError::Unavailable(_))));
    }

    #[test]
    fn mock_is_paced_to_sample_clock() {
        let mut src = MockIqSource::new();
        src.configure(&tuner(100_000.0)).unwrap();
        let started = Instant::now();
        for _ in 0..4 {
            // 10 ms of samples each
            src.read_chunk(1_000).unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn tone_phase_is_continuous() {
        let mut src = ToneIqSource::new(1_000.0, 1.0).unthrottled();
        src.configure(&tuner(48_000.0)).unwrap();
        let a = src.read_chunk(100).unwrap();
        let b = src.read_chunk(100).unwrap();
        let last = a.samples()[99];
        let first = b.samples()[0];
        let expected_step = TAU * 1_000.0 / 48_000.0;
        let step = (first * last.conj()).arg() as f64;
        assert!((step - expected_step).abs() < 1e-4);
    }

    #[test]
    fn tone_scripted_failures() {
        let mut src = ToneIqSource::new(0.0, 0.5)
            .unthrottled()
            .with_failure_at(1, HardwareError::Overflow);
        src.configure(&tuner(48_000.0)).unwrap();
        assert!(src.read_chunk(10).is_ok());
        assert_eq!(src.read_chunk(10).unwrap_err(), HardwareError::Overflow);
        assert!(src.read_chunk(10).is_ok());
    }

    #[test]
    fn tone_rejects_offset_outside_band() {
        let mut src = ToneIqSource::new(50_000.0, 0.5);
        assert!(matches!(
            src.configure(&tuner(48_000.0)),
            Err(HardwareError::Configure { param: "tone offset", .. })
        ));
    }

    #[test]
    fn tone_noise_is_bounded() {
        let mut src = ToneIqSource::new(0.0, 0.0).with_noise(0.1).unthrottled();
        src.configure(&tuner(48_000.0)).unwrap();
        let chunk = src.read_chunk(1_000).unwrap();
        assert!(chunk.samples().iter().all(|s| s.re.abs() <= 0.1 && s.im.abs() <= 0.1));
        assert!(chunk.samples().iter().any(|s| s.re != 0.0));
    }

    #[test]
    fn tone_close_sets_flag() {
        let mut src = ToneIqSource::new(0.0, 0.5);
        let flag = src.closed_flag();
        src.close();
        assert!(flag.load(Ordering::SeqCst));
    }
}
