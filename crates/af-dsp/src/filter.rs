//! Butterworth lowpass post-filter
//!
//! An N-th order Butterworth response is realised as `N / 2` cascaded
//! second-order sections (plus one first-order section for odd N). Each
//! conjugate pole pair `k` sits at angle `theta_k = PI * (2k + 1) / (2N)` from
//! the imaginary axis and maps to `Q = 1 / (2 * sin(theta_k))`.

use serde::{Deserialize, Serialize};

use crate::audio;
use crate::biquad::{BiquadCoeffs, BiquadTDF2};
use crate::error::{DspError, DspResult};

/// Post-filter settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostFilterConfig {
    /// Apply the filter at all
    pub enabled: bool,
    /// Cutoff frequency (Hz)
    pub cutoff_hz: f64,
    /// Butterworth order
    pub order: usize,
}

impl Default for PostFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cutoff_hz: audio::POST_FILTER_CUTOFF_HZ,
            order: audio::POST_FILTER_ORDER,
        }
    }
}

impl PostFilterConfig {
    /// Disabled post-filter (pure passthrough)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Q values of the second-order sections of an N-th order Butterworth filter
pub fn butterworth_qs(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| {
            let theta = std::f64::consts::PI * (2 * k + 1) as f64 / (2 * order) as f64;
            1.0 / (2.0 * theta.sin())
        })
        .collect()
}

/// Cascaded Butterworth lowpass
#[derive(Debug, Clone)]
pub struct ButterworthLowpass {
    sections: Vec<BiquadTDF2>,
    cutoff_hz: f64,
    sample_rate: f64,
}

impl ButterworthLowpass {
    /// Design the filter; cutoff must lie strictly inside (0, Nyquist)
    pub fn new(order: usize, cutoff_hz: f64, sample_rate: f64) -> DspResult<Self> {
        if order == 0 {
            return Err(DspError::InvalidConfig("filter order must be >= 1".into()));
        }
        if !(cutoff_hz > 0.0 && cutoff_hz < sample_rate / 2.0) {
            return Err(DspError::InvalidConfig(format!(
                "cutoff {cutoff_hz} Hz outside (0, {}) Hz",
                sample_rate / 2.0
            )));
        }

        let mut sections: Vec<BiquadTDF2> = butterworth_qs(order)
            .into_iter()
            .map(|q| BiquadTDF2::new(BiquadCoeffs::lowpass(cutoff_hz, q, sample_rate)))
            .collect();

        if order % 2 == 1 {
            sections.push(BiquadTDF2::new(BiquadCoeffs::first_order_lowpass(
                cutoff_hz,
                sample_rate,
            )));
        }

        Ok(Self {
            sections,
            cutoff_hz,
            sample_rate,
        })
    }

    /// Build from a post-filter config at the given rate
    pub fn from_config(config: &PostFilterConfig, sample_rate: u32) -> DspResult<Self> {
        Self::new(config.order, config.cutoff_hz, sample_rate as f64)
    }

    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }

    /// Overall magnitude response at `freq`
    pub fn magnitude_at(&self, freq: f64) -> f64 {
        self.sections
            .iter()
            .map(|s| s.coeffs().magnitude_at(freq, self.sample_rate))
            .product()
    }

    /// Filter a whole waveform from rest; the filter itself is left untouched
    pub fn apply(&self, input: &[f32]) -> Vec<f32> {
        let mut output = input.to_vec();
        for section in &self.sections {
            let mut section = section.clone();
            section.reset();
            section.process_block(&mut output);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f64, len: usize, sample_rate: f64) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin() as f32)
            .collect()
    }

    fn rms(signal: &[f32]) -> f64 {
        (signal.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / signal.len() as f64).sqrt()
    }

    #[test]
    fn test_sixth_order_qs() {
        let qs = butterworth_qs(6);
        assert_eq!(qs.len(), 3);
        assert_abs_diff_eq!(qs[0], 1.9318516525781366, epsilon = 1e-12);
        assert_abs_diff_eq!(qs[1], std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_abs_diff_eq!(qs[2], 0.5176380902050415, epsilon = 1e-12);
    }

    #[test]
    fn test_response_shape() {
        let filter = ButterworthLowpass::new(6, 4000.0, 16000.0).unwrap();

        // -3 dB at the cutoff, flat passband, steep stopband
        assert_abs_diff_eq!(filter.magnitude_at(4000.0), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_abs_diff_eq!(filter.magnitude_at(100.0), 1.0, epsilon = 1e-4);
        assert!(filter.magnitude_at(7000.0) < 0.01);
    }

    #[test]
    fn test_odd_order_adds_first_order_section() {
        let filter = ButterworthLowpass::new(3, 1000.0, 16000.0).unwrap();
        assert_eq!(filter.sections.len(), 2);
        assert!((filter.magnitude_at(1000.0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_apply_passes_low_and_rejects_high() {
        let filter = ButterworthLowpass::new(6, 4000.0, 16000.0).unwrap();

        let low = filter.apply(&sine(440.0, 16000, 16000.0));
        let high = filter.apply(&sine(7000.0, 16000, 16000.0));

        // Skip the transient
        assert!((rms(&low[2000..]) - std::f64::consts::FRAC_1_SQRT_2).abs() < 0.01);
        assert!(rms(&high[2000..]) < 0.01);
    }

    #[test]
    fn test_apply_is_stateless() {
        let filter = ButterworthLowpass::new(6, 4000.0, 16000.0).unwrap();
        let input = sine(1000.0, 512, 16000.0);
        assert_eq!(filter.apply(&input), filter.apply(&input));
    }

    #[test]
    fn test_invalid_cutoff() {
        assert!(ButterworthLowpass::new(6, 8000.0, 16000.0).is_err());
        assert!(ButterworthLowpass::new(6, 0.0, 16000.0).is_err());
        assert!(ButterworthLowpass::new(0, 1000.0, 16000.0).is_err());
    }
}
