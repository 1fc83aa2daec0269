// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod bands;
pub mod config;
pub mod error;
pub mod model;
pub mod policies;
pub mod state;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use bands::BandPreset;
pub use config::{DeviceLimits, PipelineConfig};
pub use error::{ConfigurationError, HardwareError, ProcessingError};
pub use model::{AudioChunk, DemodMode, SampleChunk, SpectrumResult, TunerSettings, WindowKind};
pub use policies::{ExponentialBackoff, NoRetry, RetryPolicy};
pub use state::{AcquisitionEvent, AcquisitionState, AcquisitionStateMachine};
