// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

use crate::cache::FilterCache;

/// Voice-band lower edge.
pub const SSB_LOW_CUT_HZ: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sideband {
    Upper,
    Lower,
}

/// Product detector on baseband IQ. Sideband selection happens at tuning
/// time, so both arms reduce to the in-phase component.
pub(super) fn product_detect(samples: &[Complex<f32>], sideband: Sideband) -> Vec<f32> {
    match sideband {
        Sideband::Upper => samples.iter().map(|s| s.re).collect(),
        Sideband::Lower => samples.iter().map(|s| s.conj().re).collect(),
    }
}

pub(super) fn demodulate(
    samples: &[Complex<f32>],
    sideband: Sideband,
    sample_rate: f64,
    bandwidth: f64,
    filters: &mut FilterCache,
) -> Vec<f32> {
    let audio = product_detect(samples, sideband);
    filters
        .bandpass(sample_rate, SSB_LOW_CUT_HZ, bandwidth)
        .apply(&audio)
}
