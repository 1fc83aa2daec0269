// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Runtime configuration changes.
//!
//! Every setter edits a copy of the current [`PipelineConfig`], validates
//! it and only then publishes it with a bumped version. A rejected change
//! leaves the published configuration untouched.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use h1sdr_core::bands::find_band;
use h1sdr_core::{ConfigurationError, DemodMode, PipelineConfig, WindowKind};

use crate::stage::StageHandle;

#[derive(Debug, Clone)]
pub struct ConfigHandle {
    sender: Arc<watch::Sender<PipelineConfig>>,
    demod_stage: Option<StageHandle>,
}

impl ConfigHandle {
    pub fn new(initial: PipelineConfig) -> Result<Self, ConfigurationError> {
        initial.validate()?;
        let (sender, _) = watch::channel(initial);
        Ok(Self {
            sender: Arc::new(sender),
            demod_stage: None,
        })
    }

    /// Keep the demodulator stage's enable flag in step with the mode.
    pub fn with_demod_stage(mut self, stage: StageHandle) -> Self {
        stage.set_enabled(self.current().demod_mode.is_audio());
        self.demod_stage = Some(stage);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineConfig> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> PipelineConfig {
        self.sender.borrow().clone()
    }

    /// Apply `edit` to a copy, validate, and publish atomically.
    pub fn update(
        &self,
        edit: impl FnOnce(&mut PipelineConfig),
    ) -> Result<PipelineConfig, ConfigurationError> {
        let mut outcome = Err(ConfigurationError::Invalid("update not applied".into()));
        self.sender.send_if_modified(|config| {
            let mut candidate = config.clone();
            edit(&mut candidate);
            candidate.version = config.version;
            if let Err(err) = candidate.validate() {
                outcome = Err(err);
                return false;
            }
            if candidate == *config {
                outcome = Ok(candidate);
                return false;
            }
            candidate.version = config.version + 1;
            *config = candidate.clone();
            outcome = Ok(candidate);
            true
        });
        let config = outcome?;
        if let Some(stage) = &self.demod_stage {
            stage.set_enabled(config.demod_mode.is_audio());
        }
        Ok(config)
    }

    pub fn set_center_frequency(&self, hz: f64) -> Result<PipelineConfig, ConfigurationError> {
        self.update(|c| c.center_freq = hz)
    }

    pub fn set_sample_rate(&self, hz: f64) -> Result<PipelineConfig, ConfigurationError> {
        self.update(|c| c.sample_rate = hz)
    }

    pub fn set_gain(&self, db: f64) -> Result<PipelineConfig, ConfigurationError> {
        self.update(|c| c.gain_db = db)
    }

    pub fn set_ppm_correction(&self, ppm: i32) -> Result<PipelineConfig, ConfigurationError> {
        self.update(|c| c.ppm_correction = ppm)
    }

    /// Switch demodulation. `None` bandwidth selects the mode default.
    pub fn set_demod_mode(
        &self,
        mode: DemodMode,
        bandwidth: Option<f64>,
    ) -> Result<PipelineConfig, ConfigurationError> {
        let config = self.update(|c| {
            c.demod_mode = mode;
            c.demod_bandwidth = bandwidth;
        })?;
        info!(mode = %mode, bandwidth = ?config.effective_bandwidth(), "demodulation mode set");
        Ok(config)
    }

    pub fn set_fft_size(&self, size: usize) -> Result<PipelineConfig, ConfigurationError> {
        self.update(|c| c.fft_size = size)
    }

    pub fn set_window(&self, window: WindowKind) -> Result<PipelineConfig, ConfigurationError> {
        self.update(|c| c.window = window)
    }

    pub fn set_smoothing(&self, alpha: f32) -> Result<PipelineConfig, ConfigurationError> {
        self.update(|c| c.smoothing = alpha)
    }

    /// Tune to a named preset: center and typical gain, plus the preset's
    /// first audio mode when the current mode is not one it allows.
    pub fn tune_to_band(&self, key: &str) -> Result<PipelineConfig, ConfigurationError> {
        let band = find_band(key).ok_or_else(|| ConfigurationError::UnknownBand(key.to_string()))?;
        let config = self.update(|c| {
            c.center_freq = band.center_freq;
            c.gain_db = band.typical_gain;
            if !band.allows(c.demod_mode) {
                c.demod_mode = band.default_audio_mode().unwrap_or(DemodMode::Spectrum);
                c.demod_bandwidth = None;
            }
        })?;
        info!(
            band = band.key,
            center_freq = band.center_freq,
            mode = %config.demod_mode,
            "tuned to band preset"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{ProcessingStage, StageContext, StagePayload, StageSlot};
    use h1sdr_core::{ProcessingError, SampleChunk};

    struct Nop;

    impl ProcessingStage for Nop {
        fn name(&self) -> &str {
            "demod"
        }

        fn process(
            &mut self,
            _chunk: &SampleChunk,
            _ctx: &StageContext,
        ) -> Result<StagePayload, ProcessingError> {
            Ok(StagePayload::Disabled)
        }
    }

    fn handle() -> ConfigHandle {
        ConfigHandle::new(PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_valid_change_bumps_version() {
        let handle = handle();
        let mut rx = handle.subscribe();
        let config = handle.set_center_frequency(145e6).unwrap();
        assert_eq!(config.center_freq, 145e6);
        assert_eq!(config.version, 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().center_freq, 145e6);
    }

    #[test]
    fn test_rejected_change_keeps_previous() {
        let handle = handle();
        let before = handle.current();
        let rx = handle.subscribe();

        assert!(matches!(
            handle.set_center_frequency(10e6),
            Err(ConfigurationError::FrequencyOutOfRange { .. })
        ));
        assert_eq!(handle.set_fft_size(1000), Err(ConfigurationError::FftSize(1000)));
        assert!(matches!(
            handle.set_gain(80.0),
            Err(ConfigurationError::GainOutOfRange { .. })
        ));
        assert!(matches!(
            handle.set_ppm_correction(5_000),
            Err(ConfigurationError::PpmOutOfRange { .. })
        ));
        assert!(matches!(
            handle.set_sample_rate(10e6),
            Err(ConfigurationError::SampleRateOutOfRange { .. })
        ));
        assert!(handle.set_smoothing(0.0).is_err());

        assert_eq!(handle.current(), before);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_unchanged_value_does_not_publish() {
        let handle = handle();
        let rx = handle.subscribe();
        let config = handle.set_window(WindowKind::Hann).unwrap();
        assert_eq!(config.version, 0);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_demod_mode_bandwidth_validation() {
        let handle = handle();
        let config = handle.set_demod_mode(DemodMode::Usb, None).unwrap();
        assert_eq!(config.effective_bandwidth(), Some(2_700.0));
        assert!(matches!(
            handle.set_demod_mode(DemodMode::Cw, Some(5_000.0)),
            Err(ConfigurationError::BandwidthOutOfRange { mode: "CW", .. })
        ));
        assert_eq!(handle.current().demod_mode, DemodMode::Usb);
        let config = handle.set_demod_mode(DemodMode::Cw, Some(250.0)).unwrap();
        assert_eq!(config.effective_bandwidth(), Some(250.0));
    }

    #[test]
    fn test_demod_stage_follows_mode() {
        let stage = StageSlot::new(Box::new(Nop));
        let handle = handle().with_demod_stage(stage.clone());
        assert!(!stage.is_enabled());
        handle.set_demod_mode(DemodMode::Fm, None).unwrap();
        assert!(stage.is_enabled());
        handle.set_demod_mode(DemodMode::Spectrum, None).unwrap();
        assert!(!stage.is_enabled());
    }

    #[test]
    fn test_tune_to_band() {
        let stage = StageSlot::new(Box::new(Nop));
        let handle = handle().with_demod_stage(stage.clone());
        handle.set_demod_mode(DemodMode::Usb, None).unwrap();

        let config = handle.tune_to_band("aviation").unwrap();
        assert_eq!(config.center_freq, 125e6);
        assert_eq!(config.demod_mode, DemodMode::Am);
        assert!(stage.is_enabled());

        let config = handle.tune_to_band("h1_line").unwrap();
        assert_eq!(config.demod_mode, DemodMode::Spectrum);
        assert!(!stage.is_enabled());

        assert_eq!(
            handle.tune_to_band("20m_band"),
            Err(ConfigurationError::UnknownBand("20m_band".into()))
        );
    }

    #[test]
    fn test_clones_share_channel() {
        let handle = handle();
        let other = handle.clone();
        other.set_gain(20.0).unwrap();
        assert_eq!(handle.current().gain_db, 20.0);
    }
}
