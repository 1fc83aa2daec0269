// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

use super::remove_mean;
use crate::cache::FilterCache;

/// AM envelope detector: magnitude of IQ.
pub(super) fn envelope(samples: &[Complex<f32>]) -> Vec<f32> {
    samples
        .iter()
        .map(|sample| (sample.re * sample.re + sample.im * sample.im).sqrt())
        .collect()
}

/// Envelope with the carrier removed, low-passed to `bandwidth`.
pub(super) fn demodulate(
    samples: &[Complex<f32>],
    sample_rate: f64,
    bandwidth: f64,
    filters: &mut FilterCache,
) -> Vec<f32> {
    let mut audio = envelope(samples);
    remove_mean(&mut audio);
    if bandwidth < sample_rate / 2.0 {
        audio = filters.lowpass(sample_rate, bandwidth).apply(&audio);
    }
    audio
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(a: f32, b: f32, tol: f32, label: &str) {
        assert!(
            (a - b).abs() <= tol,
            "{}: expected {} ≈ {} (tol {})",
            label,
            a,
            b,
            tol
        );
    }

    #[test]
    fn test_envelope_magnitude() {
        let input = vec![
            Complex::new(0.0_f32, 0.0),
            Complex::new(3.0, 4.0),
            Complex::new(0.0, -1.0),
        ];
        let expected = [0.0_f32, 5.0, 1.0];
        for (idx, (&got, &exp)) in envelope(&input).iter().zip(expected.iter()).enumerate() {
            assert_approx_eq(got, exp, 1e-6, &format!("AM sample {idx}"));
        }
    }

    #[test]
    fn test_constant_carrier_removed() {
        let input = vec![Complex::new(0.6_f32, 0.8); 256];
        let out = demodulate(&input, 48_000.0, 6_000.0, &mut FilterCache::default());
        assert_eq!(out.len(), 256);
        for (idx, &v) in out.iter().enumerate() {
            assert_approx_eq(v, 0.0, 1e-6, &format!("AM sample {idx}"));
        }
    }
}
