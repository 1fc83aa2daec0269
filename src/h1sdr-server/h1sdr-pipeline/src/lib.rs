// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Acquisition, fan-out supervision and runtime control for the DSP stages.
//!
//! Data flow: an [`IqSource`] is read on a dedicated thread by
//! [`Acquisition`], chunks land in a drop-oldest [`ChunkQueue`], and the
//! consumer hands each chunk to the [`Supervisor`], which runs every
//! registered [`ProcessingStage`] concurrently and reports per-stage results.

pub mod acquisition;
pub mod control;
pub mod metrics;
pub mod queue;
pub mod source;
pub mod stage;
pub mod stages;
pub mod supervisor;

#[cfg(feature = "soapysdr-sys")]
pub mod soapy;

pub use acquisition::{chunk_size_for, Acquisition, AcquisitionOptions, AcquisitionStatus};
pub use control::ConfigHandle;
pub use h1sdr_dsp::DemodulatorInfo;
pub use metrics::{Throughput, ThroughputMeter};
pub use queue::{ChunkQueue, QueueStats, DEFAULT_QUEUE_CAPACITY};
#[cfg(feature = "soapysdr-sys")]
pub use soapy::SoapyIqSource;
pub use source::{IqSource, MockIqSource, ToneIqSource};
pub use stage::{
    ProcessingStage, StageContext, StageError, StageHandle, StageOutcome, StagePayload,
    StageReport, StageSlot, StageStats,
};
pub use stages::{
    DemodInfoHandle, DemodStage, SpectrumStage, WaterfallHandle, WaterfallLine, WaterfallStage,
    DEFAULT_WATERFALL_LINES,
};
pub use supervisor::{StageSummary, Supervisor, SupervisorStats, DEFAULT_STAGE_TIMEOUT};
