// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Throughput {
    /// Cycles completed within the last second.
    pub cycles_per_second: f64,
    pub last_cycle_ms: f64,
    pub total_cycles: u64,
}

/// Rolling cycle rate over the last second.
#[derive(Debug, Default)]
pub struct ThroughputMeter {
    completions: VecDeque<Instant>,
    last_cycle: Duration,
    total: u64,
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.record_at(Instant::now(), elapsed);
    }

    fn record_at(&mut self, now: Instant, elapsed: Duration) {
        self.completions.push_back(now);
        self.last_cycle = elapsed;
        self.total += 1;
        self.expire(now);
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.completions.front() {
            if now.duration_since(oldest) > WINDOW {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&mut self) -> Throughput {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&mut self, now: Instant) -> Throughput {
        self.expire(now);
        Throughput {
            cycles_per_second: self.completions.len() as f64 / WINDOW.as_secs_f64(),
            last_cycle_ms: self.last_cycle.as_secs_f64() * 1e3,
            total_cycles: self.total,
        }
    }
}
