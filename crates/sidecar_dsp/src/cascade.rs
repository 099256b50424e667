//! Peaking Filter Cascade
//!
//! An ordered chain of peaking BiQuads compiled from an [`EqGains`]
//! snapshot. Each channel gets its own filter state.

use biquad::{Biquad, DirectForm2Transposed};

use crate::eq::{Band, EqGains};
use crate::error::DspError;

/// The compiled filter chain applied to every chunk
///
/// Built once per gain change and then only processed; there is no way to
/// edit a band in place.
pub struct FilterCascade {
    sample_rate: f32,
    channels: usize,
    bands: Vec<Band>,
    // Indexed as [band * channels + channel]
    filters: Vec<DirectForm2Transposed<f32>>,
}

impl FilterCascade {
    /// A cascade with no filters (passthrough)
    pub fn empty(sample_rate: f32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            bands: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Compile the active bands of `gains` into a cascade
    ///
    /// Bands at or above Nyquist for this sample rate are skipped.
    pub fn build(gains: &EqGains, sample_rate: f32, channels: usize) -> Result<Self, DspError> {
        if sample_rate <= 0.0 || !sample_rate.is_finite() {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if channels == 0 {
            return Err(DspError::InvalidChannelCount);
        }

        let bands: Vec<Band> = gains
            .active_bands()
            .filter(|band| band.below_nyquist(sample_rate))
            .collect();

        let mut filters = Vec::with_capacity(bands.len() * channels);
        for band in &bands {
            let coeffs = band.to_coefficients(sample_rate)?;
            for _ in 0..channels {
                filters.push(DirectForm2Transposed::<f32>::new(coeffs));
            }
        }

        Ok(Self {
            sample_rate,
            channels,
            bands,
            filters,
        })
    }

    /// Number of active filters in the chain
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// The bands compiled into this cascade, low to high
    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Process an interleaved buffer in-place
    ///
    /// # Real-time Safety
    /// No allocations. Cost is O(frames * channels * active bands).
    #[inline]
    pub fn process_interleaved(&mut self, buffer: &mut [f32]) {
        if self.bands.is_empty() {
            return;
        }

        let channels = self.channels;
        let band_count = self.bands.len();
        for frame in buffer.chunks_exact_mut(channels) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let mut value = *sample;
                for band in 0..band_count {
                    value = self.filters[band * channels + channel].run(value);
                }
                *sample = value;
            }
        }
    }

    /// Clear delay lines so the next buffer doesn't ring from old audio
    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset_state();
        }
    }
}

impl std::fmt::Debug for FilterCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCascade")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("bands", &self.bands)
            .finish()
    }
}
