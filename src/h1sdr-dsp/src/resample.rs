// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Arbitrary-ratio rate conversion for demodulated audio.
//!
//! Large reductions go through an integer decimator first; the remaining
//! fractional step is a short polyphase windowed-sinc interpolator.

use std::sync::OnceLock;

use crate::cache::FilterCache;
use crate::filter::{odd_taps, BlockFirFilter};

/// Below this output/input ratio an integer decimation stage runs first.
pub const DECIMATION_THRESHOLD: f64 = 0.1;

const RESAMP_TAPS: usize = 6;
const RESAMP_PHASES: usize = 32;
/// Slightly sub-Nyquist sinc cutoff to tame top-end imaging.
const RESAMP_CUTOFF: f32 = 0.94;
const MAX_DECIMATION_TAPS: usize = 1023;

type ResampleBank = [[f32; RESAMP_TAPS]; RESAMP_PHASES];

fn build_resample_bank() -> ResampleBank {
    let mut bank = [[0.0; RESAMP_TAPS]; RESAMP_PHASES];
    let anchor = (RESAMP_TAPS / 2 - 1) as f32;
    let pi = std::f32::consts::PI;
    for (phase_idx, phase) in bank.iter_mut().enumerate() {
        let center = anchor + phase_idx as f32 / RESAMP_PHASES as f32;
        let mut sum = 0.0_f32;
        for (tap_idx, coeff) in phase.iter_mut().enumerate() {
            let x = tap_idx as f32 - center;
            let sinc = if x.abs() < 1e-6 {
                RESAMP_CUTOFF
            } else {
                (pi * x * RESAMP_CUTOFF).sin() / (pi * x)
            };
            // Hann over the support, shifted with the fractional phase.
            let pos = (x + RESAMP_TAPS as f32 / 2.0) / RESAMP_TAPS as f32;
            let window = 0.5 - 0.5 * (2.0 * pi * pos.clamp(0.0, 1.0)).cos();
            *coeff = sinc * window;
            sum += *coeff;
        }
        if sum.abs() > 1e-9 {
            let inv = 1.0 / sum;
            for coeff in phase.iter_mut() {
                *coeff *= inv;
            }
        }
    }
    bank
}

fn resample_bank() -> &'static ResampleBank {
    static BANK: OnceLock<ResampleBank> = OnceLock::new();
    BANK.get_or_init(build_resample_bank)
}

/// Output length for `len` input samples: `floor(len * out / in)`.
pub fn resampled_len(len: usize, in_rate: f64, out_rate: f64) -> usize {
    if !(in_rate > 0.0 && out_rate > 0.0) {
        return 0;
    }
    (len as f64 * out_rate / in_rate).floor() as usize
}

/// Convert `input` from `in_rate` to `out_rate`.
///
/// The output has exactly [`resampled_len`] samples. Downsampling is
/// anti-aliased; the input is treated as one self-contained block.
pub fn resample(input: &[f32], in_rate: f64, out_rate: f64) -> Vec<f32> {
    resample_with(input, in_rate, out_rate, &mut FilterCache::new(1))
}

/// [`resample`] taking its anti-aliasing designs from `filters`.
pub fn resample_with(
    input: &[f32],
    in_rate: f64,
    out_rate: f64,
    filters: &mut FilterCache,
) -> Vec<f32> {
    let out_len = resampled_len(input.len(), in_rate, out_rate);
    if out_len == 0 || input.is_empty() {
        return vec![0.0; out_len];
    }
    if in_rate == out_rate {
        return input.to_vec();
    }

    let ratio = out_rate / in_rate;
    let (staged, staged_rate) = if ratio < DECIMATION_THRESHOLD {
        let factor = (in_rate / out_rate).floor() as usize;
        (decimate_with(input, factor, filters), in_rate / factor as f64)
    } else if ratio < 1.0 {
        let taps = ((4.0 / ratio).ceil() as usize * 4 + 1).min(MAX_DECIMATION_TAPS);
        let cutoff = (0.45 * ratio) as f32;
        (lowpass_aligned(input, cutoff, taps, filters), in_rate)
    } else {
        (input.to_vec(), in_rate)
    };

    if staged_rate == out_rate {
        let mut out = staged;
        out.resize(out_len, 0.0);
        return out;
    }
    interpolate(&staged, staged_rate / out_rate, out_len)
}

/// Anti-aliased integer decimation keeping every `factor`-th sample.
pub fn decimate(input: &[f32], factor: usize) -> Vec<f32> {
    decimate_with(input, factor, &mut FilterCache::new(1))
}

fn decimate_with(input: &[f32], factor: usize, filters: &mut FilterCache) -> Vec<f32> {
    if factor <= 1 {
        return input.to_vec();
    }
    let taps = (10 * factor + 1).clamp(31, MAX_DECIMATION_TAPS);
    let filtered = lowpass_aligned(input, 0.4 / factor as f32, taps, filters);
    filtered.into_iter().step_by(factor).collect()
}

fn lowpass_aligned(
    input: &[f32],
    cutoff_norm: f32,
    taps: usize,
    filters: &mut FilterCache,
) -> Vec<f32> {
    let taps = odd_taps(taps);
    let design = filters.fir_lowpass(cutoff_norm, taps, input.len() + taps);
    BlockFirFilter::from_design(design).filter_aligned(input)
}

/// Split a fractional input position into a base sample and bank phase.
/// Fractions that round up to a whole sample move to the next base.
fn split_position(pos: f64) -> (isize, usize) {
    let base = pos.floor();
    let phase = ((pos - base) * RESAMP_PHASES as f64).round() as usize;
    if phase >= RESAMP_PHASES {
        (base as isize + 1, 0)
    } else {
        (base as isize, phase)
    }
}

/// Sample `input` at positions `k * step` with the polyphase bank.
fn interpolate(input: &[f32], step: f64, out_len: usize) -> Vec<f32> {
    let bank = resample_bank();
    let last = input.len() as isize - 1;
    let anchor = (RESAMP_TAPS / 2 - 1) as isize;
    (0..out_len)
        .map(|k| {
            let (base, phase) = split_position(k as f64 * step);
            bank[phase]
                .iter()
                .enumerate()
                .map(|(tap, &c)| {
                    let idx = (base - anchor + tap as isize).clamp(0, last) as usize;
                    input[idx] * c
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn sine(freq: f64, sample_rate: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (TAU * freq * n as f64 / sample_rate).sin() as f32)
            .collect()
    }

    fn zero_crossings(x: &[f32]) -> usize {
        x.windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count()
    }

    #[test]
    fn test_output_length_exact() {
        let cases = [
            (24_576usize, 240_000.0, 48_000.0),
            (245_760, 2.4e6, 48_000.0),
            (1_000, 44_100.0, 48_000.0),
            (333, 250_000.0, 48_000.0),
            (7, 2.4e6, 48_000.0),
            (100_000, 1.0e6, 22_050.0),
        ];
        for (len, in_rate, out_rate) in cases {
            let out = resample(&vec![0.25; len], in_rate, out_rate);
            assert_eq!(
                out.len(),
                resampled_len(len, in_rate, out_rate),
                "{len} @ {in_rate} -> {out_rate}"
            );
        }
    }

    #[test]
    fn test_identity_rate() {
        let input = sine(1_000.0, 48_000.0, 480);
        assert_eq!(resample(&input, 48_000.0, 48_000.0), input);
    }

    #[test]
    fn test_empty_and_invalid_rates() {
        assert!(resample(&[], 48_000.0, 8_000.0).is_empty());
        assert!(resample(&[1.0; 10], 0.0, 8_000.0).is_empty());
        assert_eq!(resampled_len(10, 48_000.0, -1.0), 0);
    }

    #[test]
    fn test_dc_level_preserved() {
        for (in_rate, len) in [(2.4e6, 240_000usize), (240_000.0, 24_000), (44_100.0, 4_410)] {
            let out = resample(&vec![0.5; len], in_rate, 48_000.0);
            let mid = out.len() / 2;
            assert!((out[mid] - 0.5).abs() < 1e-3, "{in_rate}: {}", out[mid]);
        }
    }

    #[test]
    fn test_tone_frequency_preserved() {
        let out = resample(&sine(1_000.0, 240_000.0, 240_000), 240_000.0, 48_000.0);
        // 1 s of 1 kHz has ~2000 zero crossings.
        let zc = zero_crossings(&out[100..out.len() - 100]) as i64;
        assert!((zc - 1_992).abs() < 20, "crossings {zc}");
    }

    #[test]
    fn test_decimation_rejects_out_of_band_tone() {
        // 100 kHz would alias to 4 kHz at 48 kHz without the anti-alias stage.
        let out = resample(&sine(100_000.0, 2.4e6, 240_000), 2.4e6, 48_000.0);
        let tail = &out[out.len() / 4..out.len() * 3 / 4];
        let rms = (tail.iter().map(|v| v * v).sum::<f32>() / tail.len() as f32).sqrt();
        assert!(rms < 0.01, "rms {rms}");
    }

    #[test]
    fn test_position_carries_to_next_sample() {
        assert_eq!(split_position(2.0), (2, 0));
        assert_eq!(split_position(4.5), (4, 16));
        assert_eq!(split_position(4.97), (4, 31));
        // 0.99 * 32 rounds to 32, which is phase 0 of the next sample.
        assert_eq!(split_position(4.99), (5, 0));
    }

    #[test]
    fn test_cached_designs_match_fresh_ones() {
        let mut filters = FilterCache::default();
        let input = sine(1_000.0, 2.4e6, 24_000);
        let first = resample_with(&input, 2.4e6, 48_000.0, &mut filters);
        let second = resample_with(&input, 2.4e6, 48_000.0, &mut filters);
        assert_eq!(first, second);
        assert_eq!(first, resample(&input, 2.4e6, 48_000.0));
        let stats = filters.stats();
        assert_eq!((stats.hits, stats.misses, stats.fir_len), (1, 1, 1));
    }

    #[test]
    fn test_bank_phases_sum_to_unity() {
        for phase in resample_bank() {
            let sum: f32 = phase.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
