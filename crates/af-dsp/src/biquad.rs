//! Biquad filter sections in Transposed Direct Form II
//!
//! TDF-II keeps the state in two registers per section and stays well
//! conditioned in floating point, which matters once several sections are
//! cascaded into a higher-order Butterworth response.

use std::f64::consts::PI;

/// Normalized biquad coefficients (a0 == 1)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Second-order lowpass (bilinear transform, prewarped at `freq`)
    pub fn lowpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = (1.0 - cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// First-order lowpass expressed as a degenerate biquad
    pub fn first_order_lowpass(freq: f64, sample_rate: f64) -> Self {
        let k = (PI * freq / sample_rate).tan();
        let norm = 1.0 / (1.0 + k);

        Self {
            b0: k * norm,
            b1: k * norm,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    /// Unity gain, no filtering
    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Magnitude response at `freq`
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let (s1, c1) = omega.sin_cos();
        let (s2, c2) = (2.0 * omega).sin_cos();

        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);

        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// Transposed Direct Form II biquad
#[derive(Debug, Clone)]
pub struct BiquadTDF2 {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl BiquadTDF2 {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    #[inline(always)]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }

    /// Filter a block in place
    pub fn process_block(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample as f64) as f32;
        }
    }
}
