// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Fan-out of per-cycle stage results to subscribers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use h1sdr_core::{AudioChunk, DemodMode, SpectrumResult};
use h1sdr_pipeline::{
    AcquisitionStatus, DemodulatorInfo, QueueStats, StageOutcome, StagePayload, StageReport,
    SupervisorStats, Throughput, WaterfallLine,
};

const RESULT_CHANNEL_CAPACITY: usize = 16;
const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// Regroups variable-length demodulator output into fixed 100 ms frames.
#[derive(Debug, Default)]
pub struct AudioAccumulator {
    format: Option<(u32, DemodMode)>,
    pending: Vec<f32>,
}

impl AudioAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every complete frame.
    ///
    /// A change of rate or mode discards the partial frame.
    pub fn push(&mut self, chunk: AudioChunk) -> Vec<AudioChunk> {
        let format = (chunk.sample_rate, chunk.mode);
        if self.format != Some(format) {
            self.pending.clear();
            self.format = Some(format);
        }
        let frame_len = (chunk.sample_rate / 10).max(1) as usize;
        self.pending.extend_from_slice(&chunk.samples);

        let whole = self.pending.len() / frame_len * frame_len;
        let ready: Vec<f32> = self.pending.drain(..whole).collect();
        ready
            .chunks_exact(frame_len)
            .map(|samples| AudioChunk {
                samples: samples.to_vec(),
                sample_rate: chunk.sample_rate,
                mode: chunk.mode,
            })
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.format = None;
    }
}

/// Broadcast senders for each result kind.
///
/// Sends to channels without subscribers are dropped.
#[derive(Debug)]
pub struct ResultBroadcast {
    spectrum: broadcast::Sender<Arc<SpectrumResult>>,
    waterfall: broadcast::Sender<Arc<WaterfallLine>>,
    audio: broadcast::Sender<Arc<AudioChunk>>,
    accumulator: AudioAccumulator,
}

impl Default for ResultBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultBroadcast {
    pub fn new() -> Self {
        let (spectrum, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let (waterfall, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let (audio, _) = broadcast::channel(AUDIO_CHANNEL_CAPACITY);
        Self {
            spectrum,
            waterfall,
            audio,
            accumulator: AudioAccumulator::new(),
        }
    }

    pub fn subscribe_spectrum(&self) -> broadcast::Receiver<Arc<SpectrumResult>> {
        self.spectrum.subscribe()
    }

    pub fn subscribe_waterfall(&self) -> broadcast::Receiver<Arc<WaterfallLine>> {
        self.waterfall.subscribe()
    }

    pub fn subscribe_audio(&self) -> broadcast::Receiver<Arc<AudioChunk>> {
        self.audio.subscribe()
    }

    /// Forward the successful payloads of one cycle. Returns the number of
    /// messages sent, audio counted per complete frame.
    pub fn publish(&mut self, reports: Vec<StageReport>) -> usize {
        let mut sent = 0;
        for report in reports {
            let StageOutcome::Success { payload, .. } = report.outcome else {
                continue;
            };
            match payload {
                StagePayload::Spectrum(spectrum) => {
                    let _ = self.spectrum.send(Arc::new(spectrum));
                    sent += 1;
                }
                StagePayload::Waterfall(line) => {
                    let _ = self.waterfall.send(Arc::new(line));
                    sent += 1;
                }
                StagePayload::Audio(audio) => {
                    for frame in self.accumulator.push(audio) {
                        let _ = self.audio.send(Arc::new(frame));
                        sent += 1;
                    }
                }
                StagePayload::Disabled => {}
            }
        }
        sent
    }
}

/// Periodic health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusFrame {
    pub acquisition: AcquisitionStatus,
    pub queue: QueueStats,
    pub supervisor: SupervisorStats,
    pub throughput: Throughput,
    pub config_version: u64,
    /// Absent until the first chunk is demodulated.
    pub demodulator: Option<DemodulatorInfo>,
}

/// One JSON line of the form `{"type": kind, "data": value}`.
pub fn json_line<T: Serialize>(kind: &str, value: &T) -> Result<String, serde_json::Error> {
    #[derive(Serialize)]
    struct Envelope<'a, T> {
        #[serde(rename = "type")]
        kind: &'a str,
        data: &'a T,
    }
    serde_json::to_string(&Envelope { kind, data: value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn audio(len: usize, rate: u32, mode: DemodMode) -> AudioChunk {
        AudioChunk {
            samples: (0..len).map(|i| (i % 100) as f32 / 100.0).collect(),
            sample_rate: rate,
            mode,
        }
    }

    fn report(stage: &str, payload: StagePayload) -> StageReport {
        StageReport {
            stage: stage.to_string(),
            cycle: 1,
            outcome: StageOutcome::Success {
                payload,
                elapsed: Duration::from_millis(1),
            },
        }
    }

    fn spectrum() -> SpectrumResult {
        SpectrumResult {
            frequencies: vec![99.9e6, 100e6, 100.1e6],
            power_db: vec![-90.0, -20.0, -90.0],
            timestamp_ms: 1,
            sample_rate: 2.4e6,
            center_freq: 100e6,
            fft_size: 3,
        }
    }

    #[test]
    fn test_accumulator_emits_100ms_frames() {
        let mut acc = AudioAccumulator::new();
        assert!(acc.push(audio(3_000, 48_000, DemodMode::Am)).is_empty());
        assert_eq!(acc.pending(), 3_000);

        let frames = acc.push(audio(7_000, 48_000, DemodMode::Am));
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 4_800 && f.sample_rate == 48_000));
        assert_eq!(acc.pending(), 400);
        // Samples keep their order across the chunk boundary.
        assert_eq!(frames[0].samples[3_000], 0.0);
        assert_eq!(frames[0].samples[3_001], 0.01);
    }

    #[test]
    fn test_accumulator_resets_on_mode_change() {
        let mut acc = AudioAccumulator::new();
        acc.push(audio(2_000, 48_000, DemodMode::Fm));
        let frames = acc.push(audio(4_800, 48_000, DemodMode::Usb));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].mode, DemodMode::Usb);
        assert_eq!(acc.pending(), 0);

        acc.push(audio(100, 48_000, DemodMode::Usb));
        acc.reset();
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn test_publish_routes_payloads() {
        let mut results = ResultBroadcast::new();
        let mut spectrum_rx = results.subscribe_spectrum();
        let mut audio_rx = results.subscribe_audio();

        let failed = StageReport {
            stage: "demod".to_string(),
            cycle: 1,
            outcome: StageOutcome::Failure {
                error: h1sdr_pipeline::StageError::Busy,
                elapsed: Duration::ZERO,
            },
        };
        let sent = results.publish(vec![
            report("spectrum", StagePayload::Spectrum(spectrum())),
            report("demod", StagePayload::Audio(audio(9_600, 48_000, DemodMode::Am))),
            report("waterfall", StagePayload::Disabled),
            failed,
        ]);
        assert_eq!(sent, 3);

        let received = spectrum_rx.try_recv().unwrap();
        assert_eq!(received.peak(), Some((100e6, -20.0)));
        assert_eq!(audio_rx.try_recv().unwrap().len(), 4_800);
        assert_eq!(audio_rx.try_recv().unwrap().len(), 4_800);
        assert!(audio_rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let mut results = ResultBroadcast::new();
        assert_eq!(
            results.publish(vec![report("spectrum", StagePayload::Spectrum(spectrum()))]),
            1
        );
    }

    #[test]
    fn test_status_line_carries_demodulator() {
        let frame = StatusFrame {
            acquisition: AcquisitionStatus {
                state: Default::default(),
                source: "tone".to_string(),
                chunks_read: 12,
                chunks_dropped: 0,
                samples_read: 12 * 24_576,
                read_errors: 0,
                chunk_size: 24_576,
                last_error: None,
            },
            queue: QueueStats::default(),
            supervisor: SupervisorStats {
                total_executions: 12,
                total_failures: 0,
                failure_rate: 0.0,
                stages: Vec::new(),
            },
            throughput: Throughput::default(),
            config_version: 3,
            demodulator: None,
        };
        let value: serde_json::Value =
            serde_json::from_str(&json_line("status", &frame).unwrap()).unwrap();
        assert_eq!(value["type"], "status");
        assert!(value["data"]["demodulator"].is_null());

        let mut bank = h1sdr_dsp::DemodulatorBank::new(h1sdr_dsp::DemodSettings {
            mode: DemodMode::Usb,
            ..Default::default()
        });
        bank.demodulate(&[num_complex::Complex::new(0.1, 0.0); 4_800], 48_000.0);
        let frame = StatusFrame {
            demodulator: Some(bank.info()),
            ..frame
        };
        let value: serde_json::Value =
            serde_json::from_str(&json_line("status", &frame).unwrap()).unwrap();
        let demod = &value["data"]["demodulator"];
        assert_eq!(demod["mode"], "USB");
        assert_eq!(demod["audio_rate"], 48_000);
        assert_eq!(demod["available_modes"].as_array().map(Vec::len), Some(5));
        assert_eq!(demod["filter_cache"]["len"], 1);
        assert_eq!(value["data"]["config_version"], 3);
    }

    #[test]
    fn test_json_line_envelope() {
        let line = json_line("spectrum", &spectrum()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "spectrum");
        assert_eq!(value["data"]["center_frequency"], 100e6);
        assert_eq!(value["data"]["fft_size"], 3);
        assert_eq!(value["data"]["timestamp"], 1);
        assert!(value["data"]["power_db"].is_array());
    }
}
