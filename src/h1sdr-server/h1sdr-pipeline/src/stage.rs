// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Processing stage contract and the slot that isolates each stage.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use h1sdr_core::{AudioChunk, PipelineConfig, ProcessingError, SampleChunk, SpectrumResult};

use crate::stages::WaterfallLine;

/// Per-cycle inputs shared by all stages.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub config: Arc<PipelineConfig>,
    pub cycle: u64,
}

/// What a stage produced for one chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StagePayload {
    Spectrum(SpectrumResult),
    Waterfall(WaterfallLine),
    Audio(AudioChunk),
    /// The stage was switched off and did not run.
    Disabled,
}

/// A unit of DSP work run once per chunk.
///
/// Implementations hold their own mutable state (smoothing history, filter
/// memory, AGC envelope). They are never called concurrently with themselves.
pub trait ProcessingStage: Send + 'static {
    fn name(&self) -> &str;

    fn process(
        &mut self,
        chunk: &SampleChunk,
        ctx: &StageContext,
    ) -> Result<StagePayload, ProcessingError>;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error("stage exceeded {0:?}")]
    Timeout(Duration),

    #[error("previous invocation still running")]
    Busy,

    #[error("stage task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone)]
pub enum StageOutcome {
    Success {
        payload: StagePayload,
        elapsed: Duration,
    },
    Failure {
        error: StageError,
        elapsed: Duration,
    },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Success { elapsed, .. } | Self::Failure { elapsed, .. } => *elapsed,
        }
    }

    pub fn payload(&self) -> Option<&StagePayload> {
        match self {
            Self::Success { payload, .. } => Some(payload),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match self {
            Self::Failure { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }

    fn is_disabled(&self) -> bool {
        matches!(
            self,
            Self::Success {
                payload: StagePayload::Disabled,
                ..
            }
        )
    }
}

/// Result of one stage for one cycle.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: String,
    pub cycle: u64,
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_time: Duration,
    pub last_error: Option<String>,
}

impl StageStats {
    pub fn average_time(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        self.total_time / self.calls as u32
    }

    fn record(&mut self, outcome: &StageOutcome) {
        self.calls += 1;
        self.total_time += outcome.elapsed();
        match outcome {
            StageOutcome::Success { .. } => self.successes += 1,
            StageOutcome::Failure { error, .. } => {
                self.failures += 1;
                self.last_error = Some(error.to_string());
            }
        }
    }
}

pub type StageHandle = Arc<StageSlot>;

/// A registered stage plus its enable flag and counters.
pub struct StageSlot {
    name: String,
    enabled: AtomicBool,
    stage: Mutex<Box<dyn ProcessingStage>>,
    stats: Mutex<StageStats>,
}

impl std::fmt::Debug for StageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSlot")
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl StageSlot {
    pub fn new(stage: Box<dyn ProcessingStage>) -> StageHandle {
        Arc::new(Self {
            name: stage.name().to_string(),
            enabled: AtomicBool::new(true),
            stage: Mutex::new(stage),
            stats: Mutex::new(StageStats::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn stats_lock(&self) -> MutexGuard<'_, StageStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> StageStats {
        self.stats_lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats_lock() = StageStats::default();
    }

    /// Count an outcome. Disabled skips leave the counters untouched.
    pub(crate) fn record(&self, outcome: &StageOutcome) {
        if outcome.is_disabled() {
            return;
        }
        self.stats_lock().record(outcome);
    }

    /// Run the stage once, turning errors and panics into a `Failure`.
    ///
    /// Blocking: call from a blocking-pool thread.
    pub fn run(&self, chunk: &SampleChunk, ctx: &StageContext) -> StageOutcome {
        let started = Instant::now();
        if !self.is_enabled() {
            return StageOutcome::Success {
                payload: StagePayload::Disabled,
                elapsed: Duration::ZERO,
            };
        }

        let mut stage = match self.stage.try_lock() {
            Ok(guard) => guard,
            // A panic is caught below, so a poisoned lock still holds usable state.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return StageOutcome::Failure {
                    error: StageError::Busy,
                    elapsed: started.elapsed(),
                }
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| stage.process(chunk, ctx)));
        let elapsed = started.elapsed();
        match result {
            Ok(Ok(payload)) => StageOutcome::Success { payload, elapsed },
            Ok(Err(err)) => StageOutcome::Failure {
                error: StageError::Processing(err),
                elapsed,
            },
            Err(panic) => StageOutcome::Failure {
                error: StageError::Panicked(panic_message(panic.as_ref())),
                elapsed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl ProcessingStage for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn process(
            &mut self,
            chunk: &SampleChunk,
            ctx: &StageContext,
        ) -> Result<StagePayload, ProcessingError> {
            chunk.validate()?;
            Ok(StagePayload::Audio(AudioChunk {
                samples: vec![0.0; chunk.len()],
                sample_rate: ctx.config.audio_rate,
                mode: ctx.config.demod_mode,
            }))
        }
    }

    struct Panics;

    impl ProcessingStage for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn process(
            &mut self,
            _chunk: &SampleChunk,
            _ctx: &StageContext,
        ) -> Result<StagePayload, ProcessingError> {
            panic!("boom");
        }
    }

    fn ctx() -> StageContext {
        StageContext {
            config: Arc::new(PipelineConfig::default()),
            cycle: 1,
        }
    }

    fn chunk(len: usize) -> SampleChunk {
        SampleChunk::new(vec![num_complex::Complex::new(0.1, 0.0); len], 48_000.0, 100e6)
    }

    #[test]
    fn test_success_payload() {
        let slot = StageSlot::new(Box::new(Echo));
        let outcome = slot.run(&chunk(16), &ctx());
        match outcome.payload() {
            Some(StagePayload::Audio(audio)) => assert_eq!(audio.len(), 16),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_processing_error_becomes_failure() {
        let slot = StageSlot::new(Box::new(Echo));
        let outcome = slot.run(&chunk(0), &ctx());
        assert_eq!(
            outcome.error(),
            Some(&StageError::Processing(ProcessingError::EmptyInput))
        );
    }

    #[test]
    fn test_panic_is_caught() {
        let slot = StageSlot::new(Box::new(Panics));
        let outcome = slot.run(&chunk(4), &ctx());
        assert_eq!(outcome.error(), Some(&StageError::Panicked("boom".into())));
        // The slot stays usable after a panic.
        let again = slot.run(&chunk(4), &ctx());
        assert!(matches!(again.error(), Some(StageError::Panicked(_))));
    }

    #[test]
    fn test_disabled_skips_without_counting() {
        let slot = StageSlot::new(Box::new(Echo));
        slot.set_enabled(false);
        let outcome = slot.run(&chunk(4), &ctx());
        assert!(matches!(outcome.payload(), Some(StagePayload::Disabled)));
        slot.record(&outcome);
        assert_eq!(slot.stats().calls, 0);
    }

    #[test]
    fn test_stats_accumulate() {
        let slot = StageSlot::new(Box::new(Echo));
        for len in [4, 0, 8] {
            let outcome = slot.run(&chunk(len), &ctx());
            slot.record(&outcome);
        }
        let stats = slot.stats();
        assert_eq!((stats.calls, stats.successes, stats.failures), (3, 2, 1));
        assert!(stats.last_error.is_some());
        slot.reset_stats();
        assert_eq!(slot.stats().calls, 0);
    }
}
