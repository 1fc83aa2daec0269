// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Built-in processing stages.

mod demod;
mod spectrum;
mod waterfall;

pub use demod::{DemodInfoHandle, DemodStage};
pub use spectrum::SpectrumStage;
pub use waterfall::{WaterfallHandle, WaterfallLine, WaterfallStage, DEFAULT_WATERFALL_LINES};

/// Tracks which config version a stage last applied.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AppliedVersion(Option<u64>);

impl AppliedVersion {
    pub(crate) fn is_stale(&self, version: u64) -> bool {
        self.0 != Some(version)
    }

    pub(crate) fn mark(&mut self, version: u64) {
        self.0 = Some(version);
    }
}
