// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bounded cache of filter designs keyed by their parameters.
//!
//! IIR designs and planned FIR responses live in separate LRU maps of the
//! same capacity. Hits and misses are counted across both.

use std::sync::Arc;

use lru::LruCache;
use serde::Serialize;

use crate::filter::{fir_fft_size, FilterDesign, FilterKind, FirDesign};

pub const DEFAULT_FILTER_CACHE_CAPACITY: usize = 32;

/// Frequencies are stored in milli-Hz so the key is hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub kind: FilterKind,
    sample_rate_mhz: u64,
    bandwidth_mhz: u64,
    low_mhz: u64,
    high_mhz: u64,
}

fn to_millihertz(hz: f64) -> u64 {
    (hz.max(0.0) * 1e3).round() as u64
}

fn from_millihertz(mhz: u64) -> f64 {
    mhz as f64 / 1e3
}

impl FilterKey {
    pub fn lowpass(sample_rate: f64, cutoff_hz: f64) -> Self {
        Self {
            kind: FilterKind::Lowpass,
            sample_rate_mhz: to_millihertz(sample_rate),
            bandwidth_mhz: to_millihertz(cutoff_hz),
            low_mhz: 0,
            high_mhz: to_millihertz(cutoff_hz),
        }
    }

    pub fn bandpass(sample_rate: f64, low_hz: f64, high_hz: f64) -> Self {
        Self {
            kind: FilterKind::Bandpass,
            sample_rate_mhz: to_millihertz(sample_rate),
            bandwidth_mhz: to_millihertz(high_hz - low_hz),
            low_mhz: to_millihertz(low_hz),
            high_mhz: to_millihertz(high_hz),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        from_millihertz(self.sample_rate_mhz)
    }

    pub fn bandwidth(&self) -> f64 {
        from_millihertz(self.bandwidth_mhz)
    }

    fn design(&self) -> FilterDesign {
        let sr = self.sample_rate();
        match self.kind {
            FilterKind::Lowpass => FilterDesign::lowpass(sr, from_millihertz(self.high_mhz)),
            FilterKind::Bandpass => FilterDesign::bandpass(
                sr,
                from_millihertz(self.low_mhz),
                from_millihertz(self.high_mhz),
            ),
        }
    }
}

/// Planned FIR responses depend only on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FirKey {
    cutoff_bits: u32,
    taps: usize,
    fft_size: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub fir_len: usize,
    pub capacity: usize,
}

pub struct FilterCache {
    designs: LruCache<FilterKey, Arc<FilterDesign>>,
    fir: LruCache<FirKey, Arc<FirDesign>>,
    hits: u64,
    misses: u64,
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_CACHE_CAPACITY)
    }
}

impl FilterCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            designs: LruCache::new(capacity.max(1)),
            fir: LruCache::new(capacity.max(1)),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_design(&mut self, key: FilterKey) -> Arc<FilterDesign> {
        if let Some(design) = self.designs.get(&key) {
            self.hits += 1;
            return Arc::clone(design);
        }
        self.misses += 1;
        let design = Arc::new(key.design());
        self.designs.put(key, Arc::clone(&design));
        design
    }

    pub fn lowpass(&mut self, sample_rate: f64, cutoff_hz: f64) -> Arc<FilterDesign> {
        self.get_or_design(FilterKey::lowpass(sample_rate, cutoff_hz))
    }

    pub fn bandpass(&mut self, sample_rate: f64, low_hz: f64, high_hz: f64) -> Arc<FilterDesign> {
        self.get_or_design(FilterKey::bandpass(sample_rate, low_hz, high_hz))
    }

    /// FFT low-pass able to take blocks of `block_size` samples in one pass.
    pub fn fir_lowpass(
        &mut self,
        cutoff_norm: f32,
        taps: usize,
        block_size: usize,
    ) -> Arc<FirDesign> {
        let taps = taps.max(1);
        let key = FirKey {
            cutoff_bits: cutoff_norm.to_bits(),
            taps,
            fft_size: fir_fft_size(block_size, taps),
        };
        if let Some(design) = self.fir.get(&key) {
            self.hits += 1;
            return Arc::clone(design);
        }
        self.misses += 1;
        let design = Arc::new(FirDesign::lowpass(cutoff_norm, taps, block_size));
        self.fir.put(key, Arc::clone(&design));
        design
    }

    /// Number of IIR designs held.
    pub fn len(&self) -> usize {
        self.designs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.designs.len() == 0
    }

    pub fn clear(&mut self) {
        self.designs.clear();
        self.fir.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.designs.len(),
            fir_len: self.fir.len(),
            capacity: self.designs.cap(),
        }
    }
}
