// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use h1sdr_core::DemodMode;

/// Gain ceiling shared by all modes (x10).
pub const MAX_GAIN_DB: f32 = 20.0;

/// Per-mode AGC tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgcProfile {
    /// Desired peak output level.
    pub target: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub max_gain_db: f32,
}

impl AgcProfile {
    pub fn for_mode(mode: DemodMode) -> Self {
        let (target, attack_ms) = match mode {
            DemodMode::Am => (0.3, 10.0),
            DemodMode::Fm | DemodMode::Usb | DemodMode::Lsb => (0.4, 1.0),
            DemodMode::Cw => (0.5, 0.1),
            DemodMode::Spectrum => (0.3, 10.0),
        };
        Self {
            target,
            attack_ms,
            release_ms: 100.0,
            max_gain_db: MAX_GAIN_DB,
        }
    }
}

/// Soft AGC with separate attack and release time constants.
///
/// Gain drops quickly when the envelope rises above the target and recovers
/// slowly afterwards. `max_gain` keeps silence from being pumped up into noise.
/// Output is hard-limited to `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct SoftAgc {
    gain: f32,
    envelope: f32,
    attack_coeff: f32,
    release_coeff: f32,
    target: f32,
    max_gain: f32,
}

impl SoftAgc {
    pub fn new(
        sample_rate: f32,
        attack_ms: f32,
        release_ms: f32,
        target: f32,
        max_gain_db: f32,
    ) -> Self {
        let sr = sample_rate.max(1.0);
        let attack_coeff = 1.0 - (-1.0 / (attack_ms * 1e-3 * sr)).exp();
        let release_coeff = 1.0 - (-1.0 / (release_ms * 1e-3 * sr)).exp();
        Self {
            gain: 1.0,
            envelope: 0.0,
            attack_coeff,
            release_coeff,
            target: target.max(0.01),
            max_gain: 10.0_f32.powf(max_gain_db / 20.0),
        }
    }

    pub fn with_profile(sample_rate: f32, profile: AgcProfile) -> Self {
        Self::new(
            sample_rate,
            profile.attack_ms,
            profile.release_ms,
            profile.target,
            profile.max_gain_db,
        )
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn reset(&mut self) {
        self.gain = 1.0;
        self.envelope = 0.0;
    }

    fn update_gain(&mut self, level: f32) -> f32 {
        let env_coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope += env_coeff * (level - self.envelope);

        if self.envelope > 1e-6 {
            let desired = (self.target / self.envelope).min(self.max_gain);
            let gain_coeff = if desired < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain += gain_coeff * (desired - self.gain);
        }

        self.gain
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let gain = self.update_gain(x.abs());
        (x * gain).clamp(-1.0, 1.0)
    }

    pub fn process_block(&mut self, samples: &mut [f32]) {
        for s in samples {
            *s = self.process(*s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_bounded() {
        let mut agc = SoftAgc::with_profile(48_000.0, AgcProfile::for_mode(DemodMode::Cw));
        let mut samples: Vec<f32> = (0..4800)
            .map(|i| if i % 2 == 0 { 50.0 } else { -50.0 })
            .collect();
        agc.process_block(&mut samples);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_converges_to_target() {
        let profile = AgcProfile::for_mode(DemodMode::Fm);
        let mut agc = SoftAgc::with_profile(48_000.0, profile);
        let mut out = 0.0;
        for _ in 0..48_000 {
            out = agc.process(0.1);
        }
        assert!((out - profile.target).abs() < 0.02, "settled at {out}");
    }

    #[test]
    fn test_gain_capped() {
        let mut agc = SoftAgc::new(48_000.0, 1.0, 10.0, 0.5, MAX_GAIN_DB);
        for _ in 0..48_000 {
            agc.process(0.001);
        }
        assert!(agc.gain() <= 10.0 + 1e-3);
        assert!(agc.gain() > 9.0);
    }

    #[test]
    fn test_silence_passes_through() {
        let mut agc = SoftAgc::with_profile(48_000.0, AgcProfile::for_mode(DemodMode::Am));
        let mut block = vec![0.0; 1024];
        agc.process_block(&mut block);
        assert!(block.iter().all(|&s| s == 0.0));
        assert_eq!(agc.gain(), 1.0);
    }

    #[test]
    fn test_reset_restores_unity() {
        let mut agc = SoftAgc::with_profile(48_000.0, AgcProfile::for_mode(DemodMode::Usb));
        for _ in 0..1000 {
            agc.process(0.9);
        }
        assert!(agc.gain() < 1.0);
        agc.reset();
        assert_eq!(agc.gain(), 1.0);
    }

    #[test]
    fn test_profiles() {
        assert_eq!(AgcProfile::for_mode(DemodMode::Am).target, 0.3);
        assert_eq!(AgcProfile::for_mode(DemodMode::Cw).attack_ms, 0.1);
        assert_eq!(AgcProfile::for_mode(DemodMode::Lsb).release_ms, 100.0);
    }
}
