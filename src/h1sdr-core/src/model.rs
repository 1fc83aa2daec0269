// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Demodulation mode. `Spectrum` runs the display stages only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DemodMode {
    #[default]
    Spectrum,
    Am,
    Fm,
    Usb,
    Lsb,
    Cw,
}

impl DemodMode {
    pub const AUDIO_MODES: [DemodMode; 5] = [
        DemodMode::Am,
        DemodMode::Fm,
        DemodMode::Usb,
        DemodMode::Lsb,
        DemodMode::Cw,
    ];

    /// Whether this mode produces audio.
    pub fn is_audio(self) -> bool {
        !matches!(self, Self::Spectrum)
    }

    /// Default audio bandwidth (Hz), or `None` for `Spectrum`.
    pub fn default_bandwidth(self) -> Option<f64> {
        self.bandwidth_range().map(|(default, _, _)| default)
    }

    /// `(default, min, max)` audio bandwidth in Hz.
    pub fn bandwidth_range(self) -> Option<(f64, f64, f64)> {
        match self {
            Self::Spectrum => None,
            Self::Am => Some((6_000.0, 2_000.0, 15_000.0)),
            Self::Fm => Some((15_000.0, 8_000.0, 200_000.0)),
            Self::Usb | Self::Lsb => Some((2_700.0, 1_500.0, 4_000.0)),
            Self::Cw => Some((500.0, 100.0, 1_000.0)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spectrum => "SPECTRUM",
            Self::Am => "AM",
            Self::Fm => "FM",
            Self::Usb => "USB",
            Self::Lsb => "LSB",
            Self::Cw => "CW",
        }
    }
}

impl fmt::Display for DemodMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DemodMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SPECTRUM" | "OFF" => Ok(Self::Spectrum),
            "AM" => Ok(Self::Am),
            "FM" | "NFM" | "WFM" => Ok(Self::Fm),
            "USB" => Ok(Self::Usb),
            "LSB" => Ok(Self::Lsb),
            "CW" => Ok(Self::Cw),
            other => Err(format!("unknown demodulation mode '{other}'")),
        }
    }
}

/// Window applied to each FFT frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Hann,
    Hamming,
    Blackman,
    /// Kaiser with beta = 8.6.
    Kaiser,
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hann => "hann",
            Self::Hamming => "hamming",
            Self::Blackman => "blackman",
            Self::Kaiser => "kaiser",
        };
        f.write_str(name)
    }
}

impl FromStr for WindowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Ok(Self::Hann),
            "hamming" => Ok(Self::Hamming),
            "blackman" => Ok(Self::Blackman),
            "kaiser" => Ok(Self::Kaiser),
            other => Err(format!("unknown window '{other}'")),
        }
    }
}

/// Hardware parameters pushed to an IQ source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TunerSettings {
    pub sample_rate: f64,
    pub center_freq: f64,
    pub gain_db: f64,
    pub ppm_correction: i32,
}

/// Immutable block of complex baseband samples.
///
/// Tagged with the sample rate and center frequency in effect at capture.
/// Shared between concurrently running stages behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SampleChunk {
    samples: Vec<Complex<f32>>,
    sample_rate: f64,
    center_freq: f64,
    sequence: u64,
    captured_at_ms: u64,
}

impl SampleChunk {
    pub fn new(samples: Vec<Complex<f32>>, sample_rate: f64, center_freq: f64) -> Self {
        Self {
            samples,
            sample_rate,
            center_freq,
            sequence: 0,
            captured_at_ms: unix_millis(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn samples(&self) -> &[Complex<f32>] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn center_freq(&self) -> f64 {
        self.center_freq
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at_ms(&self) -> u64 {
        self.captured_at_ms
    }

    /// Wall-clock span covered by the chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate)
    }

    /// Reject empty chunks and chunks containing NaN/inf samples.
    pub fn validate(&self) -> Result<(), ProcessingError> {
        if self.samples.is_empty() {
            return Err(ProcessingError::EmptyInput);
        }
        match self
            .samples
            .iter()
            .position(|s| !s.re.is_finite() || !s.im.is_finite())
        {
            Some(index) => Err(ProcessingError::NonFiniteInput { index }),
            None => Ok(()),
        }
    }
}

/// Smoothed power spectrum for one processing cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SpectrumResult {
    pub frequencies: Vec<f64>,
    pub power_db: Vec<f32>,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    pub sample_rate: f64,
    #[serde(rename = "center_frequency")]
    pub center_freq: f64,
    pub fft_size: usize,
}

impl SpectrumResult {
    pub fn bin_width(&self) -> f64 {
        if self.fft_size == 0 {
            return 0.0;
        }
        self.sample_rate / self.fft_size as f64
    }

    /// Frequency and level of the strongest bin.
    pub fn peak(&self) -> Option<(f64, f32)> {
        self.power_db
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, &db)| (self.frequencies[idx], db))
    }
}

/// Demodulated audio for one processing cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub mode: DemodMode,
}

impl AudioChunk {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("usb".parse::<DemodMode>(), Ok(DemodMode::Usb));
        assert_eq!("WFM".parse::<DemodMode>(), Ok(DemodMode::Fm));
        assert_eq!("spectrum".parse::<DemodMode>(), Ok(DemodMode::Spectrum));
        assert!("dstar".parse::<DemodMode>().is_err());
        assert_eq!(DemodMode::Cw.to_string(), "CW");
    }

    #[test]
    fn test_mode_bandwidth_table() {
        assert_eq!(DemodMode::Am.default_bandwidth(), Some(6_000.0));
        assert_eq!(DemodMode::Fm.default_bandwidth(), Some(15_000.0));
        assert_eq!(DemodMode::Usb.bandwidth_range(), Some((2_700.0, 1_500.0, 4_000.0)));
        assert_eq!(DemodMode::Lsb.bandwidth_range(), DemodMode::Usb.bandwidth_range());
        assert_eq!(DemodMode::Cw.bandwidth_range(), Some((500.0, 100.0, 1_000.0)));
        assert_eq!(DemodMode::Spectrum.default_bandwidth(), None);
        assert!(!DemodMode::Spectrum.is_audio());
        assert!(DemodMode::AUDIO_MODES.iter().all(|m| m.is_audio()));
    }

    #[test]
    fn test_window_parse() {
        assert_eq!("Kaiser".parse::<WindowKind>(), Ok(WindowKind::Kaiser));
        assert_eq!("hanning".parse::<WindowKind>(), Ok(WindowKind::Hann));
        assert!("rect".parse::<WindowKind>().is_err());
    }

    #[test]
    fn test_chunk_validate() {
        let ok = SampleChunk::new(vec![Complex::new(0.1, -0.1); 4], 48_000.0, 1e6);
        assert!(ok.validate().is_ok());

        let empty = SampleChunk::new(Vec::new(), 48_000.0, 1e6);
        assert_eq!(empty.validate(), Err(ProcessingError::EmptyInput));

        let mut samples = vec![Complex::new(0.0_f32, 0.0); 8];
        samples[5] = Complex::new(f32::NAN, 0.0);
        let bad = SampleChunk::new(samples, 48_000.0, 1e6);
        assert_eq!(bad.validate(), Err(ProcessingError::NonFiniteInput { index: 5 }));
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = SampleChunk::new(vec![Complex::new(0.0, 0.0); 240_000], 2.4e6, 100e6)
            .with_sequence(7);
        assert_eq!(chunk.sequence(), 7);
        assert!((chunk.duration().as_secs_f64() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_spectrum_peak_and_serialization() {
        let result = SpectrumResult {
            frequencies: vec![99.0, 100.0, 101.0, 102.0],
            power_db: vec![-100.0, -20.0, -90.0, -95.0],
            timestamp_ms: 1,
            sample_rate: 4.0,
            center_freq: 101.0,
            fft_size: 4,
        };
        assert_eq!(result.peak(), Some((100.0, -20.0)));
        assert_eq!(result.bin_width(), 1.0);

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("center_frequency").is_some());
        assert!(json.get("timestamp").is_some());
        assert_eq!(json["fft_size"], 4);
    }

    #[test]
    fn test_audio_chunk_serializes_mode() {
        let chunk = AudioChunk {
            samples: vec![0.0; 4_800],
            sample_rate: 48_000,
            mode: DemodMode::Usb,
        };
        assert!((chunk.duration().as_secs_f64() - 0.1).abs() < 1e-9);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["mode"], "USB");
        assert_eq!(json["sample_rate"], 48_000);
    }
}
