// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use h1sdr_core::{AudioChunk, ProcessingError, SampleChunk};
use h1sdr_dsp::{DemodSettings, DemodulatorBank, DemodulatorInfo};
use tracing::debug;

use super::AppliedVersion;
use crate::stage::{ProcessingStage, StageContext, StagePayload};

/// Read side of a [`DemodStage`]'s bank state, usable while the stage is
/// owned by the supervisor.
#[derive(Debug, Clone, Default)]
pub struct DemodInfoHandle {
    info: Arc<Mutex<Option<DemodulatorInfo>>>,
}

impl DemodInfoHandle {
    fn lock(&self) -> MutexGuard<'_, Option<DemodulatorInfo>> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// State after the most recent demodulated chunk, if any.
    pub fn snapshot(&self) -> Option<DemodulatorInfo> {
        self.lock().clone()
    }

    fn store(&self, info: DemodulatorInfo) {
        *self.lock() = Some(info);
    }
}

/// Audio demodulation of every chunk in the configured mode.
pub struct DemodStage {
    bank: DemodulatorBank,
    applied: AppliedVersion,
    info: DemodInfoHandle,
}

impl Default for DemodStage {
    fn default() -> Self {
        Self::new()
    }
}

impl DemodStage {
    pub fn new() -> Self {
        Self {
            bank: DemodulatorBank::default(),
            applied: AppliedVersion::default(),
            info: DemodInfoHandle::default(),
        }
    }

    pub fn handle(&self) -> DemodInfoHandle {
        self.info.clone()
    }
}

impl ProcessingStage for DemodStage {
    fn name(&self) -> &str {
        "demod"
    }

    fn process(
        &mut self,
        chunk: &SampleChunk,
        ctx: &StageContext,
    ) -> Result<StagePayload, ProcessingError> {
        if self.applied.is_stale(ctx.config.version) {
            let settings = DemodSettings::from(ctx.config.as_ref());
            if settings != *self.bank.settings() {
                debug!(
                    mode = %settings.mode,
                    bandwidth = ?settings.effective_bandwidth(),
                    "demodulator reconfigured"
                );
                self.bank.apply(settings);
            }
            self.applied.mark(ctx.config.version);
        }

        let mode = self.bank.mode();
        if !mode.is_audio() {
            return Ok(StagePayload::Disabled);
        }
        chunk.validate()?;

        let samples = self.bank.demodulate(chunk.samples(), chunk.sample_rate());
        self.info.store(self.bank.info());

        Ok(StagePayload::Audio(AudioChunk {
            samples,
            sample_rate: self.bank.settings().audio_rate,
            mode,
        }))
    }
}
