// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Hardware acquisition on a dedicated read thread.
//!
//! The thread owns the [`IqSource`] while running, pushes every chunk into
//! the shared [`ChunkQueue`] and applies retune requests from the config
//! channel between reads. It hands the source back when it exits so the
//! acquisition can be restarted.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use h1sdr_core::{
    AcquisitionEvent, AcquisitionState, AcquisitionStateMachine, ExponentialBackoff,
    HardwareError, PipelineConfig, RetryPolicy, TunerSettings,
};

use crate::queue::ChunkQueue;
use crate::source::IqSource;

/// Seconds of signal per chunk before rounding.
const CHUNK_SECONDS: f64 = 0.1;
const CHUNK_ALIGN: usize = 1024;

/// Samples per read: ~100 ms rounded down to a multiple of 1024, at least 1024.
pub fn chunk_size_for(sample_rate: f64) -> usize {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return CHUNK_ALIGN;
    }
    let blocks = (sample_rate * CHUNK_SECONDS / CHUNK_ALIGN as f64).floor() as usize;
    blocks.max(1) * CHUNK_ALIGN
}

#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    /// Consecutive transient read failures tolerated before giving up.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// How long `stop` waits for the read thread.
    pub stop_timeout: Duration,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_base_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

impl AcquisitionOptions {
    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.max_retries, self.retry_base_delay, self.retry_max_delay)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionStatus {
    pub state: AcquisitionState,
    pub source: String,
    pub chunks_read: u64,
    pub chunks_dropped: u64,
    pub samples_read: u64,
    pub read_errors: u64,
    pub chunk_size: usize,
    pub last_error: Option<String>,
}

/// State shared between the controller and the read thread.
#[derive(Debug, Default)]
struct Shared {
    machine: Mutex<AcquisitionStateMachine>,
    chunks_read: AtomicU64,
    samples_read: AtomicU64,
    read_errors: AtomicU64,
    sequence: AtomicU64,
    chunk_size: AtomicUsize,
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, AcquisitionStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn event(&self, event: AcquisitionEvent) -> bool {
        let mut machine = self.machine();
        let from = machine.state();
        let moved = machine.process_event(event);
        if moved {
            debug!(from = %from, to = %machine.state(), "acquisition state changed");
        }
        moved
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<Box<dyn IqSource>>,
    thread: std::thread::JoinHandle<()>,
}

pub struct Acquisition {
    shared: Arc<Shared>,
    queue: Arc<ChunkQueue>,
    config: watch::Receiver<PipelineConfig>,
    options: AcquisitionOptions,
    source: Option<Box<dyn IqSource>>,
    source_name: String,
    worker: Option<Worker>,
}

impl Acquisition {
    pub fn new(
        source: Box<dyn IqSource>,
        queue: Arc<ChunkQueue>,
        config: watch::Receiver<PipelineConfig>,
        options: AcquisitionOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            queue,
            config,
            options,
            source_name: source.name().to_string(),
            source: Some(source),
            worker: None,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.machine().state()
    }

    pub fn queue(&self) -> Arc<ChunkQueue> {
        Arc::clone(&self.queue)
    }

    pub fn status(&self) -> AcquisitionStatus {
        let (state, last_error) = {
            let machine = self.shared.machine();
            (machine.state(), machine.last_error().map(|e| e.to_string()))
        };
        AcquisitionStatus {
            state,
            source: self.source_name.clone(),
            chunks_read: self.shared.chunks_read.load(Ordering::Relaxed),
            chunks_dropped: self.queue.stats().dropped,
            samples_read: self.shared.samples_read.load(Ordering::Relaxed),
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
            chunk_size: self.shared.chunk_size.load(Ordering::Relaxed),
            last_error,
        }
    }

    /// Configure the source and spawn the read thread.
    ///
    /// Starting an already active acquisition is a no-op.
    pub fn start(&mut self) -> Result<(), HardwareError> {
        // Reclaim the source from a thread that exited on its own.
        self.reap();
        if !self.shared.event(AcquisitionEvent::StartRequested) {
            return Ok(());
        }

        let Some(mut source) = self.source.take() else {
            let err =
                HardwareError::Unavailable("source lost with an abandoned read thread".into());
            self.shared.event(AcquisitionEvent::Failed(err.clone()));
            return Err(err);
        };

        let config = self.config.borrow_and_update().clone();
        let tuner = config.tuner();
        if let Err(err) = source.configure(&tuner) {
            error!("failed to configure {}: {}", source.name(), err);
            self.source = Some(source);
            self.shared.event(AcquisitionEvent::Failed(err.clone()));
            return Err(err);
        }

        let chunk_size = chunk_size_for(tuner.sample_rate);
        self.shared.chunk_size.store(chunk_size, Ordering::Relaxed);
        self.queue.reopen();

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();
        let reader = ReadLoop {
            shared: Arc::clone(&self.shared),
            queue: Arc::clone(&self.queue),
            config: self.config.clone(),
            stop: Arc::clone(&stop),
            policy: self.options.retry_policy(),
            tuner,
            chunk_size,
        };

        let spawned = std::thread::Builder::new()
            .name("sdr-iq-read".to_string())
            .spawn(move || {
                let source = reader.run(source);
                // The controller may have given up waiting.
                let _ = done_tx.send(source);
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                let err = HardwareError::Unavailable(format!(
                    "failed to spawn sdr-iq-read thread: {e}"
                ));
                self.shared.event(AcquisitionEvent::Failed(err.clone()));
                return Err(err);
            }
        };

        self.worker = Some(Worker {
            stop,
            done: done_rx,
            thread,
        });
        self.shared.event(AcquisitionEvent::Started);
        info!(
            source = %self.source_name,
            sample_rate = tuner.sample_rate,
            center_freq = tuner.center_freq,
            chunk_size,
            "acquisition started"
        );
        Ok(())
    }

    /// Signal the read thread and wait up to `stop_timeout` for it.
    ///
    /// Returns `false` if the thread had to be abandoned.
    pub fn stop(&mut self) -> bool {
        self.shared.event(AcquisitionEvent::StopRequested);
        let Some(worker) = self.worker.take() else {
            return true;
        };
        worker.stop.store(true, Ordering::SeqCst);
        self.queue.close();

        let clean = match worker.done.recv_timeout(self.options.stop_timeout) {
            Ok(source) => {
                self.source = Some(source);
                if worker.thread.join().is_err() {
                    warn!("sdr-iq-read thread panicked during shutdown");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "sdr-iq-read thread did not stop within {:?}, abandoning it",
                    self.options.stop_timeout
                );
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("sdr-iq-read thread exited without returning the source");
                false
            }
        };
        self.shared.event(AcquisitionEvent::Stopped);
        info!(source = %self.source_name, "acquisition stopped");
        clean
    }

    /// Collect a worker whose read loop already gave up after a fault.
    fn reap(&mut self) {
        if self.state() != AcquisitionState::Stopped {
            return;
        }
        let Some(worker) = self.worker.take() else {
            return;
        };
        // The fault is recorded just before the thread hands back the source.
        match worker.done.recv_timeout(self.options.stop_timeout) {
            Ok(source) => {
                self.source = Some(source);
                let _ = worker.thread.join();
            }
            Err(_) => warn!("sdr-iq-read thread did not return the source after a fault"),
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.as_ref() {
            worker.stop.store(true, Ordering::SeqCst);
            self.queue.close();
        }
    }
}

struct ReadLoop {
    shared: Arc<Shared>,
    queue: Arc<ChunkQueue>,
    config: watch::Receiver<PipelineConfig>,
    stop: Arc<AtomicBool>,
    policy: ExponentialBackoff,
    tuner: TunerSettings,
    chunk_size: usize,
}

impl ReadLoop {
    fn run(mut self, mut source: Box<dyn IqSource>) -> Box<dyn IqSource> {
        let mut attempt = 0u32;
        while !self.stop.load(Ordering::SeqCst) {
            if let Err(err) = self.apply_retune(source.as_mut()) {
                error!("retune failed on {}: {}", source.name(), err);
                self.shared.event(AcquisitionEvent::Failed(err));
                break;
            }

            match source.read_chunk(self.chunk_size) {
                Ok(chunk) => {
                    attempt = 0;
                    let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
                    self.shared.chunks_read.fetch_add(1, Ordering::Relaxed);
                    self.shared
                        .samples_read
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    if self.queue.push(Arc::new(chunk.with_sequence(sequence))) {
                        debug!(sequence, "chunk queue full, dropped oldest");
                    }
                }
                Err(err) if self.policy.should_retry(attempt, &err) => {
                    self.shared.read_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = self.policy.delay(attempt);
                    attempt += 1;
                    warn!(
                        "IQ source read error: {}; retry {}/{} in {:?}",
                        err,
                        attempt,
                        self.policy.max_attempts(),
                        delay
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    self.shared.read_errors.fetch_add(1, Ordering::Relaxed);
                    error!("IQ source {} failed: {}", source.name(), err);
                    self.shared.event(AcquisitionEvent::Failed(err));
                    break;
                }
            }
        }

        source.close();
        self.queue.close();
        source
    }

    /// Push a changed tuning to the source. Rejected parameters keep the
    /// previous tuning; any other failure is fatal.
    fn apply_retune(&mut self, source: &mut dyn IqSource) -> Result<(), HardwareError> {
        if !self.config.has_changed().unwrap_or(false) {
            return Ok(());
        }
        let tuner = self.config.borrow_and_update().tuner();
        if tuner == self.tuner {
            return Ok(());
        }
        match source.configure(&tuner) {
            Ok(()) => {
                if tuner.sample_rate != self.tuner.sample_rate {
                    self.chunk_size = chunk_size_for(tuner.sample_rate);
                    self.shared
                        .chunk_size
                        .store(self.chunk_size, Ordering::Relaxed);
                }
                info!(
                    center_freq = tuner.center_freq,
                    sample_rate = tuner.sample_rate,
                    gain_db = tuner.gain_db,
                    "retuned"
                );
                self.tuner = tuner;
                Ok(())
            }
            Err(err @ HardwareError::Configure { .. }) => {
                warn!("retune rejected, keeping previous tuning: {}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
