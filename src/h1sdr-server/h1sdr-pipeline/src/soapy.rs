// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! SoapySDR-backed IQ source.

use std::time::Duration;

use num_complex::Complex;
use soapysdr::{Device, Direction, ErrorCode, RxStream};

use h1sdr_core::{HardwareError, SampleChunk, TunerSettings};

use crate::source::IqSource;

/// Per-read timeout handed to the driver.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct SoapyIqSource {
    args: String,
    device: Device,
    stream: Option<RxStream<Complex<f32>>>,
    settings: Option<TunerSettings>,
    buffer: Vec<Complex<f32>>,
}

fn map_stream_error(err: soapysdr::Error) -> HardwareError {
    match err.code {
        ErrorCode::Timeout => HardwareError::Timeout(READ_TIMEOUT),
        ErrorCode::Overflow => HardwareError::Overflow,
        ErrorCode::Corruption | ErrorCode::StreamError | ErrorCode::TimeError => {
            HardwareError::Read(err.to_string())
        }
        _ => HardwareError::Disconnected(err.to_string()),
    }
}

impl SoapyIqSource {
    /// Open the device matching `args` (e.g. `"driver=rtlsdr"`).
    pub fn open(args: &str) -> Result<Self, HardwareError> {
        tracing::info!("Initializing SoapySDR device with args: {}", args);
        let device = Device::new(args).map_err(|e| {
            HardwareError::Unavailable(format!("failed to open SoapySDR device (args={args}): {e}"))
        })?;
        tracing::info!("SoapySDR device opened successfully");
        Ok(Self {
            args: args.to_string(),
            device,
            stream: None,
            settings: None,
            buffer: Vec::new(),
        })
    }

    fn apply_rate(&self, sample_rate: f64) -> Result<(), HardwareError> {
        self.device
            .set_sample_rate(Direction::Rx, 0, sample_rate)
            .map_err(|e| HardwareError::configure("sample rate", e.to_string()))?;
        let actual = self
            .device
            .sample_rate(Direction::Rx, 0)
            .unwrap_or(sample_rate);
        tracing::info!("Set sample rate to {} Hz (actual: {} Hz)", sample_rate, actual);
        Ok(())
    }

    fn apply_frequency(&self, center_freq: f64, ppm: i32) -> Result<(), HardwareError> {
        // Correct for the crystal error by scaling the requested LO.
        let corrected = center_freq * (1.0 + ppm as f64 * 1e-6);
        self.device
            .set_frequency(Direction::Rx, 0, corrected, ())
            .map_err(|e| HardwareError::configure("frequency", e.to_string()))?;
        let actual = self.device.frequency(Direction::Rx, 0).unwrap_or(corrected);
        tracing::info!(
            "Set center frequency to {} Hz (ppm {}, actual: {} Hz)",
            center_freq,
            ppm,
            actual
        );
        Ok(())
    }

    fn apply_gain(&self, gain_db: f64) {
        if let Err(e) = self.device.set_gain(Direction::Rx, 0, gain_db) {
            tracing::warn!("Failed to set gain: {}; using device default", e);
        } else {
            let actual = self.device.gain(Direction::Rx, 0).unwrap_or(gain_db);
            tracing::info!("Set gain to {} dB (actual: {} dB)", gain_db, actual);
        }
    }

    fn start_stream(&mut self) -> Result<(), HardwareError> {
        let mut stream = self
            .device
            .rx_stream::<Complex<f32>>(&[0])
            .map_err(|e| HardwareError::Unavailable(format!("rx stream: {e}")))?;
        stream
            .activate(None)
            .map_err(|e| HardwareError::Unavailable(format!("activate stream: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.deactivate(None) {
                tracing::warn!("Failed to deactivate stream: {}", e);
            }
        }
    }
}

impl IqSource for SoapyIqSource {
    fn name(&self) -> &str {
        &self.args
    }

    fn configure(&mut self, settings: &TunerSettings) -> Result<(), HardwareError> {
        let previous = self.settings;
        let rate_changed = previous.map_or(true, |p| p.sample_rate != settings.sample_rate);

        if rate_changed {
            self.stop_stream();
            self.apply_rate(settings.sample_rate)?;
        }
        if previous.map_or(true, |p| {
            p.center_freq != settings.center_freq || p.ppm_correction != settings.ppm_correction
        }) {
            self.apply_frequency(settings.center_freq, settings.ppm_correction)?;
        }
        if previous.map_or(true, |p| p.gain_db != settings.gain_db) {
            self.apply_gain(settings.gain_db);
        }
        if self.stream.is_none() {
            self.start_stream()?;
        }
        self.settings = Some(*settings);
        Ok(())
    }

    fn read_chunk(&mut self, len: usize) -> Result<SampleChunk, HardwareError> {
        let settings = self
            .settings
            .ok_or_else(|| HardwareError::Unavailable("device not configured".into()))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| HardwareError::Unavailable("stream not active".into()))?;

        self.buffer.resize(len, Complex::new(0.0, 0.0));
        let mut filled = 0;
        while filled < len {
            let read = stream
                .read(&mut [&mut self.buffer[filled..]], READ_TIMEOUT.as_micros() as i64)
                .map_err(map_stream_error)?;
            filled += read;
        }

        Ok(SampleChunk::new(
            self.buffer.clone(),
            settings.sample_rate,
            settings.center_freq,
        ))
    }

    fn close(&mut self) {
        self.stop_stream();
        tracing::info!("SoapySDR device closed ({})", self.args);
    }
}
