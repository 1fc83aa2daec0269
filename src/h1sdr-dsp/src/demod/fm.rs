// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::TAU;

use num_complex::Complex;

use crate::cache::FilterCache;
use crate::filter::Deemphasis;

/// Broadcast de-emphasis time constant.
pub const DEEMPHASIS_TAU_US: f64 = 75.0;
/// De-emphasis only runs for wideband deviation.
pub const WIDEBAND_DEVIATION_HZ: f64 = 50_000.0;
const LIMITER_FLOOR: f64 = 1e-10;

/// Quadrature discriminator on the DC-free, amplitude-limited signal.
///
/// Returns `I·dQ − Q·dI` per sample, which is `sin` of the phase step for a
/// unit-magnitude input. The first sample is 0.
pub(super) fn discriminate(samples: &[Complex<f32>]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let (sum_re, sum_im) = samples
        .iter()
        .fold((0.0_f64, 0.0_f64), |(re, im), s| (re + s.re as f64, im + s.im as f64));
    let mean = Complex::new(sum_re / n, sum_im / n);

    let limited = samples.iter().map(|s| {
        let x = Complex::new(s.re as f64, s.im as f64) - mean;
        x / x.norm().max(LIMITER_FLOOR)
    });

    let mut output = Vec::with_capacity(samples.len());
    let mut prev: Option<Complex<f64>> = None;
    for x in limited {
        let value = match prev {
            Some(p) => {
                let d = x - p;
                x.re * d.im - x.im * d.re
            }
            None => 0.0,
        };
        output.push(value as f32);
        prev = Some(x);
    }
    output
}

/// Discriminator scaled so `deviation` maps to full scale, then low-passed.
///
/// Wideband deviation also gets 75 us de-emphasis. It is the causal one-pole
/// [`Deemphasis`] at the IQ rate, restarted for each chunk, so it adds a
/// small phase lag rather than running forward and backward.
pub(super) fn demodulate(
    samples: &[Complex<f32>],
    sample_rate: f64,
    bandwidth: f64,
    deviation: f64,
    filters: &mut FilterCache,
) -> Vec<f32> {
    let scale = sample_rate / TAU / deviation.max(1.0);
    let audio: Vec<f32> = discriminate(samples)
        .into_iter()
        .map(|d| (d as f64 * scale) as f32)
        .collect();

    let pre_cutoff = (2.0 * bandwidth).min(0.4 * sample_rate);
    let mut audio = filters.lowpass(sample_rate, pre_cutoff).apply(&audio);

    if deviation >= WIDEBAND_DEVIATION_HZ {
        let mut deemph = Deemphasis::new(sample_rate, DEEMPHASIS_TAU_US);
        for s in &mut audio {
            *s = deemph.process(*s);
        }
    }

    if bandwidth < sample_rate / 2.0 {
        audio = filters.lowpass(sample_rate, bandwidth).apply(&audio);
    }
    audio
}
