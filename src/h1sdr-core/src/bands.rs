// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Named tuning presets inside the RTL-SDR tuning range.

use serde::Serialize;

use crate::model::DemodMode;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandPreset {
    pub key: &'static str,
    pub name: &'static str,
    pub center_freq: f64,
    /// Span worth covering around the center (Hz).
    pub bandwidth: f64,
    pub typical_gain: f64,
    pub modes: &'static [DemodMode],
}

impl BandPreset {
    /// First audio mode the preset allows, if any.
    pub fn default_audio_mode(&self) -> Option<DemodMode> {
        self.modes.iter().copied().find(|m| m.is_audio())
    }

    pub fn allows(&self, mode: DemodMode) -> bool {
        self.modes.contains(&mode)
    }
}

use DemodMode::{Am, Cw, Fm, Spectrum, Usb};

pub const BAND_PRESETS: &[BandPreset] = &[
    // Radio astronomy
    BandPreset {
        key: "h1_line",
        name: "H1 Line (21cm)",
        center_freq: 1_420.405_751e6,
        bandwidth: 2.4e6,
        typical_gain: 40.0,
        modes: &[Spectrum],
    },
    BandPreset {
        key: "oh_1665",
        name: "OH Line 1665 MHz",
        center_freq: 1_665.401_8e6,
        bandwidth: 2.4e6,
        typical_gain: 40.0,
        modes: &[Spectrum],
    },
    BandPreset {
        key: "oh_1667",
        name: "OH Line 1667 MHz",
        center_freq: 1_667.359e6,
        bandwidth: 2.4e6,
        typical_gain: 40.0,
        modes: &[Spectrum],
    },
    // Broadcast
    BandPreset {
        key: "fm_broadcast",
        name: "FM Broadcast",
        center_freq: 100e6,
        bandwidth: 20e6,
        typical_gain: 20.0,
        modes: &[Fm, Spectrum],
    },
    // Amateur
    BandPreset {
        key: "12m_band",
        name: "12m Band",
        center_freq: 24.94e6,
        bandwidth: 100e3,
        typical_gain: 35.0,
        modes: &[Usb, Cw, Spectrum],
    },
    BandPreset {
        key: "10m_band",
        name: "10m Band",
        center_freq: 28.5e6,
        bandwidth: 1.7e6,
        typical_gain: 35.0,
        modes: &[Usb, Cw, Fm, Spectrum],
    },
    BandPreset {
        key: "6m_band",
        name: "6m Band",
        center_freq: 51e6,
        bandwidth: 4e6,
        typical_gain: 30.0,
        modes: &[Usb, Cw, Fm, Spectrum],
    },
    BandPreset {
        key: "2m_band",
        name: "2m Band",
        center_freq: 145e6,
        bandwidth: 4e6,
        typical_gain: 30.0,
        modes: &[Fm, Usb, Cw, Spectrum],
    },
    BandPreset {
        key: "70cm_band",
        name: "70cm Band",
        center_freq: 435e6,
        bandwidth: 30e6,
        typical_gain: 30.0,
        modes: &[Fm, Usb, Cw, Spectrum],
    },
    // Utility
    BandPreset {
        key: "aviation",
        name: "Aviation",
        center_freq: 125e6,
        bandwidth: 25e6,
        typical_gain: 30.0,
        modes: &[Am, Spectrum],
    },
    BandPreset {
        key: "marine",
        name: "Marine VHF",
        center_freq: 160e6,
        bandwidth: 5e6,
        typical_gain: 30.0,
        modes: &[Fm, Spectrum],
    },
    BandPreset {
        key: "weather_satellite",
        name: "Weather Satellite",
        center_freq: 137.5e6,
        bandwidth: 1e6,
        typical_gain: 30.0,
        modes: &[Fm, Spectrum],
    },
    BandPreset {
        key: "ism_433",
        name: "ISM 433 MHz",
        center_freq: 433.92e6,
        bandwidth: 2e6,
        typical_gain: 30.0,
        modes: &[Fm, Spectrum],
    },
];

/// Look up a preset by key (case-insensitive, `-` and `_` interchangeable).
pub fn find_band(key: &str) -> Option<&'static BandPreset> {
    let wanted = key.trim().to_ascii_lowercase().replace('-', "_");
    BAND_PRESETS.iter().find(|b| b.key == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceLimits;

    #[test]
    fn test_find_band() {
        let band = find_band("H1-Line").unwrap();
        assert!((band.center_freq - 1_420.405_751e6).abs() < 1.0);
        assert!(find_band("20m_band").is_none());
    }

    #[test]
    fn test_presets_inside_tuning_range() {
        let limits = DeviceLimits::default();
        for band in BAND_PRESETS {
            assert!(
                band.center_freq >= limits.min_freq_hz && band.center_freq <= limits.max_freq_hz,
                "{} outside tuning range",
                band.key
            );
            assert!(band.typical_gain <= limits.max_gain_db);
        }
    }

    #[test]
    fn test_default_audio_mode() {
        assert_eq!(find_band("aviation").unwrap().default_audio_mode(), Some(DemodMode::Am));
        assert_eq!(find_band("h1_line").unwrap().default_audio_mode(), None);
        assert!(find_band("2m_band").unwrap().allows(DemodMode::Usb));
    }
}
