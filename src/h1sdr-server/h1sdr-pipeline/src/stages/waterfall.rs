// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Waterfall lines: one spectrum per chunk quantized to 8-bit intensity,
//! kept in a bounded rolling history.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use h1sdr_core::model::unix_millis;
use h1sdr_core::{ConfigurationError, PipelineConfig, ProcessingError, SampleChunk};
use h1sdr_dsp::{SpectrumEstimator, SpectrumSettings};
use serde::Serialize;

use super::AppliedVersion;
use crate::stage::{ProcessingStage, StageContext, StagePayload};

pub const DEFAULT_WATERFALL_LINES: usize = 100;
pub const DEFAULT_MIN_DB: f32 = -80.0;
pub const DEFAULT_MAX_DB: f32 = 0.0;
/// Percentiles used as the display range when auto-scaling.
const AUTO_SCALE_LOW: f32 = 5.0;
const AUTO_SCALE_HIGH: f32 = 95.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterfallLine {
    pub pixels: Vec<u8>,
    pub min_db: f32,
    pub max_db: f32,
    pub auto_scale: bool,
    pub center_frequency: f64,
    pub sample_rate: f64,
    pub timestamp: u64,
    pub history_len: usize,
    pub max_lines: usize,
}

#[derive(Debug)]
struct WaterfallState {
    min_db: f32,
    max_db: f32,
    auto_scale: bool,
    max_lines: usize,
    history: VecDeque<Vec<u8>>,
}

impl WaterfallState {
    fn push(&mut self, line: Vec<u8>) {
        while self.history.len() >= self.max_lines {
            self.history.pop_front();
        }
        self.history.push_back(line);
    }
}

/// Control side of a [`WaterfallStage`], usable while the stage is owned
/// by the supervisor.
#[derive(Debug, Clone)]
pub struct WaterfallHandle {
    state: Arc<Mutex<WaterfallState>>,
}

impl WaterfallHandle {
    fn lock(&self) -> MutexGuard<'_, WaterfallState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fix the display range and turn auto-scaling off.
    pub fn set_scale_range(&self, min_db: f32, max_db: f32) -> Result<(), ConfigurationError> {
        if !(min_db.is_finite() && max_db.is_finite() && min_db < max_db) {
            return Err(ConfigurationError::Invalid(format!(
                "waterfall range {min_db}..{max_db} dB"
            )));
        }
        let mut state = self.lock();
        state.min_db = min_db;
        state.max_db = max_db;
        state.auto_scale = false;
        Ok(())
    }

    pub fn enable_auto_scale(&self) {
        self.lock().auto_scale = true;
    }

    pub fn scale_range(&self) -> (f32, f32) {
        let state = self.lock();
        (state.min_db, state.max_db)
    }

    pub fn is_auto_scale(&self) -> bool {
        self.lock().auto_scale
    }

    pub fn clear(&self) {
        self.lock().history.clear();
    }

    /// Oldest line first.
    pub fn history(&self) -> Vec<Vec<u8>> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().history.is_empty()
    }
}

pub struct WaterfallStage {
    estimator: Option<SpectrumEstimator>,
    applied: AppliedVersion,
    handle: WaterfallHandle,
}

impl Default for WaterfallStage {
    fn default() -> Self {
        Self::new(DEFAULT_WATERFALL_LINES)
    }
}

impl WaterfallStage {
    pub fn new(max_lines: usize) -> Self {
        let state = WaterfallState {
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
            auto_scale: true,
            max_lines: max_lines.max(1),
            history: VecDeque::with_capacity(max_lines.max(1)),
        };
        Self {
            estimator: None,
            applied: AppliedVersion::default(),
            handle: WaterfallHandle {
                state: Arc::new(Mutex::new(state)),
            },
        }
    }

    pub fn handle(&self) -> WaterfallHandle {
        self.handle.clone()
    }

    fn spectrum(
        &mut self,
        config: &PipelineConfig,
        chunk: &SampleChunk,
    ) -> Result<Vec<f32>, ProcessingError> {
        let settings = SpectrumSettings::from(config);
        if let Some(estimator) = self.estimator.as_mut() {
            if self.applied.is_stale(config.version) {
                estimator.reconfigure(settings)?;
            }
        } else {
            self.estimator = Some(SpectrumEstimator::new(
                settings,
                chunk.sample_rate(),
                chunk.center_freq(),
            )?);
        }
        self.applied.mark(config.version);
        let estimator = self
            .estimator
            .as_mut()
            .ok_or_else(|| ProcessingError::Numerical("waterfall estimator missing".into()))?;
        Ok(estimator
            .process(chunk.samples(), chunk.sample_rate(), chunk.center_freq())
            .power_db)
    }
}

/// Linear-interpolated percentile of `values` (`pct` in 0..=100).
fn percentile(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Clip to `[min_db, max_db]` and map linearly onto 0..=255.
fn quantize(power_db: &[f32], min_db: f32, max_db: f32) -> Vec<u8> {
    let span = max_db - min_db;
    power_db
        .iter()
        .map(|&db| {
            if span <= 0.0 {
                return 0;
            }
            let scaled = (db.clamp(min_db, max_db) - min_db) / span * 255.0;
            scaled as u8
        })
        .collect()
}

impl ProcessingStage for WaterfallStage {
    fn name(&self) -> &str {
        "waterfall"
    }

    fn process(
        &mut self,
        chunk: &SampleChunk,
        ctx: &StageContext,
    ) -> Result<StagePayload, ProcessingError> {
        chunk.validate()?;
        let power_db = self.spectrum(&ctx.config, chunk)?;

        let mut state = self.handle.lock();
        if state.auto_scale {
            state.min_db = percentile(&power_db, AUTO_SCALE_LOW);
            state.max_db = percentile(&power_db, AUTO_SCALE_HIGH);
        }
        let pixels = quantize(&power_db, state.min_db, state.max_db);
        state.push(pixels.clone());

        Ok(StagePayload::Waterfall(WaterfallLine {
            pixels,
            min_db: state.min_db,
            max_db: state.max_db,
            auto_scale: state.auto_scale,
            center_frequency: chunk.center_freq(),
            sample_rate: chunk.sample_rate(),
            timestamp: unix_millis(),
            history_len: state.history.len(),
            max_lines: state.max_lines,
        }))
    }
}
