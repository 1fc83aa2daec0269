// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::PI;

use h1sdr_core::WindowKind;

/// Kaiser window shape parameter.
pub const KAISER_BETA: f64 = 8.6;

/// Symmetric window of length `n` (endpoints included, `N - 1` denominator).
pub fn window_coeffs(kind: WindowKind, n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let m = (n - 1) as f64;
    let i0_beta = bessel_i0(KAISER_BETA);

    (0..n)
        .map(|i| {
            let x = i as f64;
            let w = match kind {
                WindowKind::Hann => 0.5 - 0.5 * (2.0 * PI * x / m).cos(),
                WindowKind::Hamming => 0.54 - 0.46 * (2.0 * PI * x / m).cos(),
                WindowKind::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * x / m).cos() + 0.08 * (4.0 * PI * x / m).cos()
                }
                WindowKind::Kaiser => {
                    let r = 2.0 * x / m - 1.0;
                    bessel_i0(KAISER_BETA * (1.0 - r * r).max(0.0).sqrt()) / i0_beta
                }
            };
            w.max(0.0) as f32
        })
        .collect()
}

/// Zeroth-order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        let f = half / k as f64;
        term *= f * f;
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
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
    fn test_hann_endpoints_and_peak() {
        let w = window_coeffs(WindowKind::Hann, 9);
        assert_approx_eq(w[0], 0.0, 1e-7, "hann start");
        assert_approx_eq(w[8], 0.0, 1e-7, "hann end");
        assert_approx_eq(w[4], 1.0, 1e-7, "hann center");
    }

    #[test]
    fn test_hamming_endpoints() {
        let w = window_coeffs(WindowKind::Hamming, 16);
        assert_approx_eq(w[0], 0.08, 1e-6, "hamming start");
        assert_approx_eq(w[15], 0.08, 1e-6, "hamming end");
    }

    #[test]
    fn test_blackman_symmetric_nonnegative() {
        let w = window_coeffs(WindowKind::Blackman, 33);
        for i in 0..33 {
            assert!(w[i] >= 0.0);
            assert_approx_eq(w[i], w[32 - i], 1e-6, &format!("blackman symmetry {i}"));
        }
        assert_approx_eq(w[16], 1.0, 1e-6, "blackman center");
    }

    #[test]
    fn test_kaiser_shape() {
        let w = window_coeffs(WindowKind::Kaiser, 65);
        assert_approx_eq(w[32], 1.0, 1e-6, "kaiser center");
        // I0(0) / I0(8.6) at the edges.
        assert_approx_eq(w[0], (1.0 / bessel_i0(KAISER_BETA)) as f32, 1e-6, "kaiser edge");
        assert!(w[0] < 0.01);
    }

    #[test]
    fn test_bessel_i0_known_values() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-12);
        assert!((bessel_i0(1.0) - 1.266_065_877_752_008).abs() < 1e-10);
    }

    #[test]
    fn test_degenerate_lengths() {
        assert!(window_coeffs(WindowKind::Hann, 0).is_empty());
        assert_eq!(window_coeffs(WindowKind::Kaiser, 1), vec![1.0]);
    }
}
