// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use h1sdr_core::{PipelineConfig, ProcessingError, SampleChunk};
use h1sdr_dsp::{SpectrumEstimator, SpectrumSettings};
use tracing::debug;

use super::AppliedVersion;
use crate::stage::{ProcessingStage, StageContext, StagePayload};

/// Smoothed power spectrum of every chunk.
#[derive(Default)]
pub struct SpectrumStage {
    estimator: Option<SpectrumEstimator>,
    applied: AppliedVersion,
}

impl SpectrumStage {
    pub fn new() -> Self {
        Self::default()
    }

    fn estimator(
        &mut self,
        config: &PipelineConfig,
        chunk: &SampleChunk,
    ) -> Result<&mut SpectrumEstimator, ProcessingError> {
        let settings = SpectrumSettings::from(config);
        if let Some(estimator) = self.estimator.as_mut() {
            if self.applied.is_stale(config.version) {
                estimator.reconfigure(settings)?;
                debug!(
                    fft_size = settings.fft_size,
                    window = %settings.window,
                    "spectrum reconfigured"
                );
            }
        } else {
            self.estimator = Some(SpectrumEstimator::new(
                settings,
                chunk.sample_rate(),
                chunk.center_freq(),
            )?);
        }
        self.applied.mark(config.version);
        self.estimator
            .as_mut()
            .ok_or_else(|| ProcessingError::Numerical("spectrum estimator missing".into()))
    }
}

impl ProcessingStage for SpectrumStage {
    fn name(&self) -> &str {
        "spectrum"
    }

    fn process(
        &mut self,
        chunk: &SampleChunk,
        ctx: &StageContext,
    ) -> Result<StagePayload, ProcessingError> {
        chunk.validate()?;
        let estimator = self.estimator(&ctx.config, chunk)?;
        Ok(StagePayload::Spectrum(estimator.process(
            chunk.samples(),
            chunk.sample_rate(),
            chunk.center_freq(),
        )))
    }
}
