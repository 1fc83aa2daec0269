// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Real-valued audio filters.
//!
//! IIR designs are Butterworth cascades of RBJ biquads evaluated in `f64`, so
//! a few hundred Hz cutoff at a multi-MHz sample rate stays stable. The FIR
//! path is a windowed-sinc low-pass run through an overlap-save FFT block.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex as FftComplex;
use rustfft::{Fft, FftPlanner};

/// Cutoffs are clamped to this fraction of Nyquist.
pub const MAX_CUTOFF_FRACTION: f64 = 0.95;
/// Lowest usable cutoff (Hz).
pub const MIN_CUTOFF_HZ: f64 = 1.0;
pub const LOWPASS_ORDER: usize = 6;
pub const BANDPASS_ORDER: usize = 4;

pub(crate) fn windowed_sinc_coeffs(cutoff_norm: f32, taps: usize) -> Vec<f32> {
    let taps = taps.max(1);
    let m = (taps - 1) as f32;
    let pi = std::f32::consts::PI;
    let mut coeffs: Vec<f32> = (0..taps)
        .map(|i| {
            let x = i as f32 - m / 2.0;
            let sinc = if x == 0.0 {
                2.0 * cutoff_norm
            } else {
                (2.0 * pi * cutoff_norm * x).sin() / (pi * x)
            };
            let window = if taps == 1 {
                1.0
            } else {
                0.5 * (1.0 - (2.0 * pi * i as f32 / m).cos())
            };
            sinc * window
        })
        .collect();
    let sum: f32 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        let inv = 1.0 / sum;
        for coeff in &mut coeffs {
            *coeff *= inv;
        }
    }
    coeffs
}

/// FFT size that fits `block_size` new samples plus the filter history.
pub(crate) fn fir_fft_size(block_size: usize, taps: usize) -> usize {
    (block_size.max(1) + taps.max(1) - 1).next_power_of_two()
}

/// Odd tap count, so the group delay is a whole number of samples.
pub(crate) fn odd_taps(taps: usize) -> usize {
    taps.max(1) | 1
}

/// Windowed-sinc low-pass response planned for one FFT size.
///
/// Immutable once built and shared by every [`BlockFirFilter`] that runs it.
pub struct FirDesign {
    h_freq: Vec<FftComplex<f32>>,
    n_taps: usize,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
}

impl FirDesign {
    /// `cutoff_norm` is relative to the sample rate (0.5 = Nyquist).
    pub fn lowpass(cutoff_norm: f32, taps: usize, block_size: usize) -> Self {
        let taps = taps.max(1);
        let coeffs = windowed_sinc_coeffs(cutoff_norm, taps);
        let fft_size = fir_fft_size(block_size, taps);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let mut h_freq: Vec<FftComplex<f32>> =
            coeffs.iter().map(|&c| FftComplex::new(c, 0.0)).collect();
        h_freq.resize(fft_size, FftComplex::new(0.0, 0.0));
        fft.process(&mut h_freq);

        Self {
            h_freq,
            n_taps: taps,
            fft_size,
            fft,
            ifft,
        }
    }

    pub fn taps(&self) -> usize {
        self.n_taps
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }
}

/// FFT-based overlap-save FIR low-pass filter (block interface).
pub struct BlockFirFilter {
    design: Arc<FirDesign>,
    overlap: Vec<f32>,
    scratch_freq: Vec<FftComplex<f32>>,
}

impl BlockFirFilter {
    /// `cutoff_norm` is relative to the sample rate (0.5 = Nyquist).
    pub fn new(cutoff_norm: f32, taps: usize, block_size: usize) -> Self {
        Self::from_design(Arc::new(FirDesign::lowpass(cutoff_norm, taps, block_size)))
    }

    /// Fresh filter state over a shared design.
    pub fn from_design(design: Arc<FirDesign>) -> Self {
        Self {
            overlap: vec![0.0; design.n_taps - 1],
            scratch_freq: Vec::with_capacity(design.fft_size),
            design,
        }
    }

    /// Group delay in samples.
    pub fn delay(&self) -> usize {
        (self.design.n_taps - 1) / 2
    }

    /// Filter one block. Blocks longer than the planned block size are split.
    pub fn filter_block(&mut self, input: &[f32]) -> Vec<f32> {
        let max_block = self.design.fft_size + 1 - self.design.n_taps;
        let mut output = Vec::with_capacity(input.len());
        for block in input.chunks(max_block.max(1)) {
            self.filter_one(block, &mut output);
        }
        output
    }

    /// Filter `input` from the current state and drop the group delay, so
    /// the output lines up with the input sample for sample.
    pub fn filter_aligned(&mut self, input: &[f32]) -> Vec<f32> {
        let delay = self.delay();
        let mut padded = Vec::with_capacity(input.len() + delay);
        padded.extend_from_slice(input);
        padded.resize(input.len() + delay, 0.0);
        let mut out = self.filter_block(&padded);
        out.drain(..delay);
        out
    }

    fn filter_one(&mut self, input: &[f32], output: &mut Vec<f32>) {
        let design = &self.design;
        let n_new = input.len();
        let n_overlap = design.n_taps - 1;
        let scale = 1.0 / design.fft_size as f32;

        let buf = &mut self.scratch_freq;
        buf.clear();
        buf.extend(self.overlap.iter().map(|&s| FftComplex::new(s, 0.0)));
        buf.extend(input.iter().map(|&s| FftComplex::new(s, 0.0)));
        buf.resize(design.fft_size, FftComplex::new(0.0, 0.0));

        design.fft.process(buf);
        for (x, &h) in buf.iter_mut().zip(design.h_freq.iter()) {
            *x = *x * h * scale;
        }
        design.ifft.process(buf);

        output.extend(buf[n_overlap..n_overlap + n_new].iter().map(|s| s.re));

        if n_overlap > 0 {
            if n_new >= n_overlap {
                self.overlap.copy_from_slice(&input[n_new - n_overlap..]);
            } else {
                self.overlap.copy_within(n_new..n_overlap, 0);
                self.overlap[n_overlap - n_new..].copy_from_slice(input);
            }
        }
    }
}

/// Run a zero-state FIR low-pass over `input`, compensating its group delay.
pub fn fir_lowpass_aligned(input: &[f32], cutoff_norm: f32, taps: usize) -> Vec<f32> {
    let taps = odd_taps(taps);
    BlockFirFilter::new(cutoff_norm, taps, input.len() + taps).filter_aligned(input)
}

/// Direct-form-I biquad section.
#[derive(Debug, Clone, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn from_raw(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn lowpass(sample_rate: f64, cutoff_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let b1 = 1.0 - cos_w0;
        Self::from_raw(b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    pub fn highpass(sample_rate: f64, cutoff_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let b1 = -(1.0 + cos_w0);
        Self::from_raw(-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Q of the `k`-th second-order section of an even-order Butterworth filter.
fn butterworth_q(order: usize, k: usize) -> f64 {
    let theta = (2 * k + 1) as f64 * PI / (2 * order) as f64;
    1.0 / (2.0 * theta.cos())
}

fn butterworth_sections(
    order: usize,
    make: impl Fn(f64) -> Biquad,
) -> impl Iterator<Item = Biquad> {
    let order = (order.max(2) / 2) * 2;
    (0..order / 2).map(move |k| make(butterworth_q(order, k)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Lowpass,
    Bandpass,
}

/// Designed filter coefficients. Every [`FilterDesign::apply`] call starts
/// from zero state, so one design can be shared across chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDesign {
    kind: FilterKind,
    sections: Vec<Biquad>,
}

impl FilterDesign {
    /// Order-6 Butterworth low-pass.
    pub fn lowpass(sample_rate: f64, cutoff_hz: f64) -> Self {
        let cutoff = clamp_cutoff(sample_rate, cutoff_hz);
        Self {
            kind: FilterKind::Lowpass,
            sections: butterworth_sections(LOWPASS_ORDER, |q| {
                Biquad::lowpass(sample_rate, cutoff, q)
            })
            .collect(),
        }
    }

    /// Order-4 high-pass at `low_hz` followed by an order-4 low-pass at
    /// `high_hz`. Degrades to a plain low-pass at `high_hz` when the clamped
    /// edges leave no pass band.
    pub fn bandpass(sample_rate: f64, low_hz: f64, high_hz: f64) -> Self {
        let low = clamp_cutoff(sample_rate, low_hz);
        let high = clamp_cutoff(sample_rate, high_hz);
        if high <= low {
            return Self::lowpass(sample_rate, high);
        }
        let sections = butterworth_sections(BANDPASS_ORDER, |q| {
            Biquad::highpass(sample_rate, low, q)
        })
        .chain(butterworth_sections(BANDPASS_ORDER, |q| {
            Biquad::lowpass(sample_rate, high, q)
        }))
        .collect();
        Self {
            kind: FilterKind::Bandpass,
            sections,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn order(&self) -> usize {
        self.sections.len() * 2
    }

    pub fn apply(&self, input: &[f32]) -> Vec<f32> {
        let mut sections = self.sections.clone();
        for s in &mut sections {
            s.reset();
        }
        input
            .iter()
            .map(|&x| {
                sections
                    .iter_mut()
                    .fold(x as f64, |acc, section| section.process(acc)) as f32
            })
            .collect()
    }
}

fn clamp_cutoff(sample_rate: f64, cutoff_hz: f64) -> f64 {
    let max = sample_rate / 2.0 * MAX_CUTOFF_FRACTION;
    cutoff_hz.clamp(MIN_CUTOFF_HZ, max.max(MIN_CUTOFF_HZ))
}

/// One-pole FM de-emphasis, run forward only.
///
/// This is the causal RC response: a step reaches `1 - 1/e` after one time
/// constant and the output lags the input. It is not a zero-phase
/// (forward-backward) filter, so the state can carry across blocks.
#[derive(Debug, Clone)]
pub struct Deemphasis {
    alpha: f64,
    y: f64,
}

impl Deemphasis {
    pub fn new(sample_rate: f64, tau_us: f64) -> Self {
        let sr = sample_rate.max(1.0);
        let tau = tau_us.max(1.0) * 1e-6;
        let alpha = 1.0 - (-1.0 / (sr * tau)).exp();
        Self { alpha, y: 0.0 }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        self.y += self.alpha * (x as f64 - self.y);
        self.y as f32
    }
}
