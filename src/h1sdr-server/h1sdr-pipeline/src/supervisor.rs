// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Concurrent fan-out of one chunk to every registered stage.
//!
//! Each stage runs on the blocking pool inside its slot's catch boundary.
//! A stage that errors, panics, times out or is still busy from an earlier
//! cycle is reported as a failure for this cycle only; the other stages and
//! the cycle itself always complete.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use h1sdr_core::{PipelineConfig, SampleChunk};

use crate::stage::{
    ProcessingStage, StageContext, StageError, StageHandle, StageOutcome, StageReport, StageSlot,
    StageStats,
};

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub enabled: bool,
    pub average_time: Duration,
    #[serde(flatten)]
    pub stats: StageStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStats {
    /// Completed dispatch cycles.
    pub total_executions: u64,
    /// Failed stage invocations across all cycles.
    pub total_failures: u64,
    pub failure_rate: f64,
    pub stages: Vec<StageSummary>,
}

pub struct Supervisor {
    config: watch::Receiver<PipelineConfig>,
    snapshot: Arc<PipelineConfig>,
    stages: Vec<StageHandle>,
    stage_timeout: Option<Duration>,
    cycles: u64,
    failures: u64,
}

impl Supervisor {
    /// `stage_timeout` of `None` lets every stage run to completion.
    pub fn new(config: watch::Receiver<PipelineConfig>, stage_timeout: Option<Duration>) -> Self {
        let snapshot = Arc::new(config.borrow().clone());
        Self {
            config,
            snapshot,
            stages: Vec::new(),
            stage_timeout,
            cycles: 0,
            failures: 0,
        }
    }

    /// Register a stage. Stages run in registration order for reporting.
    pub fn add_stage(&mut self, stage: Box<dyn ProcessingStage>) -> StageHandle {
        let slot = StageSlot::new(stage);
        debug!(stage = slot.name(), "stage registered");
        self.stages.push(Arc::clone(&slot));
        slot
    }

    pub fn stage(&self, name: &str) -> Option<StageHandle> {
        self.stages.iter().find(|s| s.name() == name).cloned()
    }

    pub fn stages(&self) -> &[StageHandle] {
        &self.stages
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Config snapshot used by the most recent cycle.
    pub fn config(&self) -> Arc<PipelineConfig> {
        Arc::clone(&self.snapshot)
    }

    fn refresh_snapshot(&mut self) {
        // A closed sender keeps the last published value.
        if self.config.has_changed().unwrap_or(false) {
            self.snapshot = Arc::new(self.config.borrow_and_update().clone());
        }
    }

    /// Run every stage against `chunk` and wait for all of them.
    ///
    /// Reports come back in registration order, one per stage.
    pub async fn dispatch(&mut self, chunk: Arc<SampleChunk>) -> Vec<StageReport> {
        self.refresh_snapshot();
        self.cycles += 1;
        let ctx = StageContext {
            config: Arc::clone(&self.snapshot),
            cycle: self.cycles,
        };

        let timeout = self.stage_timeout;
        let runs = self.stages.iter().map(|slot| {
            let slot = Arc::clone(slot);
            let chunk = Arc::clone(&chunk);
            let ctx = ctx.clone();
            async move {
                let started = Instant::now();
                let task = tokio::task::spawn_blocking({
                    let slot = Arc::clone(&slot);
                    move || slot.run(&chunk, &ctx)
                });
                let joined = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, task).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            return StageOutcome::Failure {
                                error: StageError::Timeout(limit),
                                elapsed: started.elapsed(),
                            }
                        }
                    },
                    None => task.await,
                };
                joined.unwrap_or_else(|err| StageOutcome::Failure {
                    error: StageError::Join(err.to_string()),
                    elapsed: started.elapsed(),
                })
            }
        });
        let outcomes = join_all(runs).await;

        let cycle = self.cycles;
        let mut reports = Vec::with_capacity(outcomes.len());
        for (slot, outcome) in self.stages.iter().zip(outcomes) {
            slot.record(&outcome);
            if let StageOutcome::Failure { error, elapsed } = &outcome {
                self.failures += 1;
                warn!(
                    stage = slot.name(),
                    cycle,
                    elapsed_ms = elapsed.as_secs_f64() * 1e3,
                    error = %error,
                    "stage failed"
                );
            }
            reports.push(StageReport {
                stage: slot.name().to_string(),
                cycle,
                outcome,
            });
        }
        reports
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            total_executions: self.cycles,
            total_failures: self.failures,
            failure_rate: self.failures as f64 / self.cycles.max(1) as f64,
            stages: self
                .stages
                .iter()
                .map(|slot| {
                    let stats = slot.stats();
                    StageSummary {
                        name: slot.name().to_string(),
                        enabled: slot.is_enabled(),
                        average_time: stats.average_time(),
                        stats,
                    }
                })
                .collect(),
        }
    }

    pub fn reset_stats(&mut self) {
        self.cycles = 0;
        self.failures = 0;
        for slot in &self.stages {
            slot.reset_stats();
        }
    }
}
