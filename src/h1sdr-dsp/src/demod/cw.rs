// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::TAU;

use num_complex::Complex;

use crate::cache::FilterCache;

/// Lowest allowed bandpass edge (Hz).
pub const CW_MIN_EDGE_HZ: f64 = 10.0;

/// Mix against the beat oscillator: `re(x · conj(bfo))`.
///
/// `phase` is the oscillator phase at the first sample and is advanced past
/// the last one, so consecutive chunks stay continuous.
pub(super) fn mix_bfo(
    samples: &[Complex<f32>],
    sample_rate: f64,
    tone_hz: f64,
    phase: &mut f64,
) -> Vec<f32> {
    let step = TAU * tone_hz / sample_rate;
    let start = *phase;
    let out = samples
        .iter()
        .enumerate()
        .map(|(n, s)| {
            let (sin, cos) = (start + step * n as f64).sin_cos();
            (s.re as f64 * cos + s.im as f64 * sin) as f32
        })
        .collect();
    *phase = (start + step * samples.len() as f64).rem_euclid(TAU);
    out
}

pub(super) fn demodulate(
    samples: &[Complex<f32>],
    sample_rate: f64,
    tone_hz: f64,
    bandwidth: f64,
    phase: &mut f64,
    filters: &mut FilterCache,
) -> Vec<f32> {
    let audio = mix_bfo(samples, sample_rate, tone_hz, phase);
    let low = (tone_hz - bandwidth / 2.0).max(CW_MIN_EDGE_HZ);
    let high = tone_hz + bandwidth / 2.0;
    filters.bandpass(sample_rate, low, high).apply(&audio)
}
