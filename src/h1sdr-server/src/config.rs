// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for h1sdr-server.
//!
//! Config is loaded from the `[h1sdr-server]` section of `h1sdr.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./h1sdr.toml`
//! 3. `~/.config/h1sdr/h1sdr.toml`
//! 4. `/etc/h1sdr/h1sdr.toml`

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use h1sdr_app::ConfigFile;
use h1sdr_core::bands::find_band;
use h1sdr_core::config::{
    DEFAULT_AUDIO_RATE, DEFAULT_CENTER_FREQ, DEFAULT_CW_TONE, DEFAULT_FFT_SIZE,
    DEFAULT_FM_DEVIATION, DEFAULT_GAIN_DB, DEFAULT_SAMPLE_RATE, DEFAULT_SMOOTHING,
};
use h1sdr_core::{DemodMode, DeviceLimits, PipelineConfig, WindowKind};
use h1sdr_pipeline::{
    AcquisitionOptions, DEFAULT_QUEUE_CAPACITY, DEFAULT_STAGE_TIMEOUT, DEFAULT_WATERFALL_LINES,
};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// IQ source and tuner settings
    pub device: DeviceConfig,
    /// Spectrum and demodulator parameters
    pub dsp: DspConfig,
    /// Initial demodulation mode
    pub demod: DemodConfig,
    /// Queueing, stage supervision and read retries
    pub pipeline: PipelineSection,
    /// Result delivery
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Which IQ source feeds the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Zero-valued samples paced to the sample clock
    Mock,
    /// Synthetic carrier at `tone_offset_hz` from center
    #[default]
    Tone,
    /// Hardware receiver via SoapySDR
    Soapysdr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub source: SourceKind,
    /// SoapySDR device args (e.g. "driver=rtlsdr")
    pub args: Option<String>,
    pub sample_rate: f64,
    pub center_freq: f64,
    pub gain_db: f64,
    pub ppm_correction: i32,
    /// Offset of the synthetic carrier from center, tone source only
    pub tone_offset_hz: f64,
    pub tone_amplitude: f32,
    /// Peak amplitude of uniform noise added to the tone
    pub noise_amplitude: f32,
    /// Tuner envelope used to validate every configuration change
    pub limits: DeviceLimits,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            args: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            center_freq: DEFAULT_CENTER_FREQ,
            gain_db: DEFAULT_GAIN_DB,
            ppm_correction: 0,
            tone_offset_hz: 50_000.0,
            tone_amplitude: 0.5,
            noise_amplitude: 0.01,
            limits: DeviceLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    pub fft_size: usize,
    pub window: WindowKind,
    /// Exponential smoothing factor in (0, 1]
    pub smoothing: f32,
    pub audio_rate: u32,
    pub fm_deviation: f64,
    pub cw_tone: f64,
    /// Reset the AGC envelope at the start of each chunk
    pub agc_reset_per_chunk: bool,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            window: WindowKind::Hann,
            smoothing: DEFAULT_SMOOTHING,
            audio_rate: DEFAULT_AUDIO_RATE,
            fm_deviation: DEFAULT_FM_DEVIATION,
            cw_tone: DEFAULT_CW_TONE,
            agc_reset_per_chunk: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemodConfig {
    pub mode: DemodMode,
    /// Audio bandwidth in Hz; the mode default applies when unset
    pub bandwidth: Option<f64>,
    /// Band preset applied at startup (e.g. "aviation")
    pub band: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Chunks held between acquisition and processing
    pub queue_capacity: usize,
    /// Per-stage deadline; 0 disables the deadline
    pub stage_timeout_ms: u64,
    /// Consecutive transient read failures before acquisition stops
    pub max_read_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How long shutdown waits for the read thread
    pub stop_timeout_ms: u64,
    pub waterfall_lines: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let acquisition = AcquisitionOptions::default();
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stage_timeout_ms: DEFAULT_STAGE_TIMEOUT.as_millis() as u64,
            max_read_retries: acquisition.max_retries,
            retry_base_delay_ms: acquisition.retry_base_delay.as_millis() as u64,
            retry_max_delay_ms: acquisition.retry_max_delay.as_millis() as u64,
            stop_timeout_ms: acquisition.stop_timeout.as_millis() as u64,
            waterfall_lines: DEFAULT_WATERFALL_LINES,
        }
    }
}

impl PipelineSection {
    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_ms > 0).then(|| Duration::from_millis(self.stage_timeout_ms))
    }

    pub fn acquisition_options(&self) -> AcquisitionOptions {
        AcquisitionOptions {
            max_retries: self.max_read_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print spectrum, waterfall and status frames to stdout as JSON lines
    pub json: bool,
    /// Interval between status reports; 0 disables them
    pub status_interval_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json: false,
            status_interval_ms: 5_000,
        }
    }
}

impl OutputConfig {
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_ms > 0).then(|| Duration::from_millis(self.status_interval_ms))
    }
}

impl ServerConfig {
    /// Initial pipeline configuration described by this file.
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sample_rate: self.device.sample_rate,
            center_freq: self.device.center_freq,
            gain_db: self.device.gain_db,
            ppm_correction: self.device.ppm_correction,
            fft_size: self.dsp.fft_size,
            window: self.dsp.window,
            smoothing: self.dsp.smoothing,
            demod_mode: self.demod.mode,
            demod_bandwidth: self.demod.bandwidth,
            fm_deviation: self.dsp.fm_deviation,
            cw_tone: self.dsp.cw_tone,
            audio_rate: self.dsp.audio_rate,
            agc_reset_per_chunk: self.dsp.agc_reset_per_chunk,
            limits: self.device.limits,
            version: 0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        self.to_pipeline_config()
            .validate()
            .map_err(|e| e.to_string())?;

        if let Some(band) = self.demod.band.as_deref() {
            if find_band(band).is_none() {
                return Err(format!("[demod].band '{}' is not a known preset", band));
            }
        }

        if self.device.source == SourceKind::Tone {
            let nyquist = self.device.sample_rate / 2.0;
            if self.device.tone_offset_hz.abs() >= nyquist {
                return Err(format!(
                    "[device].tone_offset_hz must be within ±{} Hz at this sample rate",
                    nyquist
                ));
            }
            if !(self.device.tone_amplitude > 0.0 && self.device.tone_amplitude <= 1.0) {
                return Err("[device].tone_amplitude must be in range (0, 1]".to_string());
            }
            if !(0.0..=1.0).contains(&self.device.noise_amplitude) {
                return Err("[device].noise_amplitude must be in range 0..=1".to_string());
            }
        }

        let pipeline = &self.pipeline;
        if pipeline.queue_capacity == 0 {
            return Err("[pipeline].queue_capacity must be > 0".to_string());
        }
        if pipeline.waterfall_lines == 0 {
            return Err("[pipeline].waterfall_lines must be > 0".to_string());
        }
        if pipeline.stop_timeout_ms == 0 {
            return Err("[pipeline].stop_timeout_ms must be > 0".to_string());
        }
        if pipeline.retry_base_delay_ms > pipeline.retry_max_delay_ms {
            return Err(
                "[pipeline].retry_base_delay_ms must not exceed retry_max_delay_ms".to_string(),
            );
        }

        Ok(())
    }

    /// Generate an example configuration under the `[h1sdr-server]` header.
    pub fn example_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "h1sdr-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            device: DeviceConfig {
                source: SourceKind::Soapysdr,
                args: Some("driver=rtlsdr".to_string()),
                center_freq: 125e6,
                gain_db: 30.0,
                ..DeviceConfig::default()
            },
            dsp: DspConfig::default(),
            demod: DemodConfig {
                mode: DemodMode::Am,
                bandwidth: Some(8_000.0),
                band: None,
            },
            pipeline: PipelineSection::default(),
            output: OutputConfig::default(),
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid \
                     (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "h1sdr-server"
    }
}
