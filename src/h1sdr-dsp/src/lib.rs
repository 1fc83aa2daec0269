// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Streaming DSP building blocks: windowed spectrum estimation, IIR/FIR
//! filters, rate conversion, AGC and the AM/FM/SSB/CW demodulator bank.

pub mod agc;
pub mod cache;
pub mod demod;
pub mod filter;
pub mod resample;
pub mod spectrum;
pub mod window;

pub use agc::{AgcProfile, SoftAgc};
pub use cache::{FilterCache, FilterKey};
pub use demod::{DemodSettings, DemodulatorBank, DemodulatorInfo};
pub use filter::{BlockFirFilter, FilterDesign, FilterKind, FirDesign};
pub use resample::{resample, resample_with, resampled_len};
pub use spectrum::{SpectrumEstimator, SpectrumInfo, SpectrumSettings};
pub use window::window_coeffs;
