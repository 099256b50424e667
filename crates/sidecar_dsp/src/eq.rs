//! 7-Band Equalizer Settings
//!
//! Fixed center frequencies with user-adjustable gains. Filter coefficients
//! follow the RBJ (Robert Bristow-Johnson) Audio EQ Cookbook peaking form.

use biquad::{Coefficients, ToHertz, Type};

use crate::error::DspError;

/// Number of EQ bands
pub const NUM_BANDS: usize = 7;

/// EQ band center frequencies (Hz)
pub const EQ_BANDS: [f32; NUM_BANDS] = [
    60.0,    // Bass
    150.0,   // Upper bass
    400.0,   // Low-mid
    1000.0,  // Mid
    2400.0,  // Upper-mid
    6000.0,  // Presence
    15000.0, // Air
];

/// Q shared by every band
pub const BAND_Q: f32 = 1.0;

/// Lowest gain a band accepts (dB)
pub const MIN_GAIN_DB: f32 = -12.0;

/// Highest gain a band accepts (dB)
pub const MAX_GAIN_DB: f32 = 12.0;

/// Bands with |gain| at or below this are left out of the cascade
pub const ACTIVE_GAIN_THRESHOLD_DB: f32 = 0.1;

/// Human-readable label for a band ("60 Hz", "2.4 kHz", ...)
pub fn band_label(index: usize) -> Option<&'static str> {
    const LABELS: [&str; NUM_BANDS] = [
        "60 Hz", "150 Hz", "400 Hz", "1 kHz", "2.4 kHz", "6 kHz", "15 kHz",
    ];
    LABELS.get(index).copied()
}

/// A single band that takes part in the cascade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub index: usize,
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
}

impl Band {
    /// Whether this band's frequency can be represented at `sample_rate`
    pub fn below_nyquist(&self, sample_rate: f32) -> bool {
        self.frequency * 2.0 < sample_rate
    }

    /// Generate peaking BiQuad coefficients for this band
    pub(crate) fn to_coefficients(self, sample_rate: f32) -> Result<Coefficients<f32>, DspError> {
        // biquad's PeakingEQ takes the gain in dB
        Coefficients::<f32>::from_params(
            Type::PeakingEQ(self.gain_db),
            sample_rate.hz(),
            self.frequency.hz(),
            self.q,
        )
        .map_err(|_| DspError::InvalidCoefficients {
            frequency: self.frequency,
            sample_rate,
        })
    }
}

/// Gains for all 7 bands, in dB
///
/// Every setter clamps into [`MIN_GAIN_DB`, `MAX_GAIN_DB`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EqGains {
    gains: [f32; NUM_BANDS],
}

impl EqGains {
    /// All bands at 0 dB
    pub fn flat() -> Self {
        Self::default()
    }

    /// Build from a full gain vector. Non-finite values become 0 dB.
    pub fn from_array(gains: [f32; NUM_BANDS]) -> Self {
        Self {
            gains: gains.map(clamp_gain),
        }
    }

    /// Set gain for a specific band (0-6)
    pub fn set(&mut self, band_index: usize, gain_db: f32) -> Result<(), DspError> {
        if band_index >= NUM_BANDS {
            return Err(DspError::InvalidBandIndex(band_index));
        }
        if !gain_db.is_finite() {
            return Err(DspError::InvalidGain(gain_db));
        }
        self.gains[band_index] = clamp_gain(gain_db);
        Ok(())
    }

    pub fn get(&self, band_index: usize) -> Option<f32> {
        self.gains.get(band_index).copied()
    }

    pub fn as_array(&self) -> [f32; NUM_BANDS] {
        self.gains
    }

    /// Bands whose gain is large enough to be worth filtering, low to high
    pub fn active_bands(&self) -> impl Iterator<Item = Band> + '_ {
        self.gains
            .iter()
            .enumerate()
            .filter(|(_, gain)| gain.abs() > ACTIVE_GAIN_THRESHOLD_DB)
            .map(|(index, &gain_db)| Band {
                index,
                frequency: EQ_BANDS[index],
                gain_db,
                q: BAND_Q,
            })
    }

    pub fn is_flat(&self) -> bool {
        self.active_bands().next().is_none()
    }
}

fn clamp_gain(gain_db: f32) -> f32 {
    if gain_db.is_finite() {
        gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    } else {
        0.0
    }
}
