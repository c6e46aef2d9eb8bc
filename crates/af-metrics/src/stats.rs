//! Scalar signal statistics

use serde::{Deserialize, Serialize};

use crate::error::{MetricError, MetricResult};

/// RMS below this makes the dynamic range undefined
const RMS_FLOOR: f64 = 1e-10;

/// Duration, level and crest of a single signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalStats {
    pub duration_s: f64,
    pub rms: f64,
    pub peak: f64,
}

impl SignalStats {
    pub fn measure(signal: &[f32], sample_rate: u32) -> MetricResult<Self> {
        if signal.is_empty() {
            return Err(MetricError::InvalidSignal("empty signal".into()));
        }
        if sample_rate == 0 {
            return Err(MetricError::InvalidSignal("sample rate must be positive".into()));
        }
        if signal.iter().any(|s| !s.is_finite()) {
            return Err(MetricError::NonFinite("signal statistics"));
        }

        let sum_sq: f64 = signal.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let peak = signal.iter().fold(0.0f64, |m, &s| m.max((s as f64).abs()));

        Ok(Self {
            duration_s: signal.len() as f64 / sample_rate as f64,
            rms: (sum_sq / signal.len() as f64).sqrt(),
            peak,
        })
    }

    /// `20 * log10(peak / rms)`
    pub fn dynamic_range_db(&self) -> MetricResult<f64> {
        if self.rms < RMS_FLOOR {
            return Err(MetricError::Degenerate("silent signal has no dynamic range".into()));
        }
        Ok(20.0 * (self.peak / self.rms).log10())
    }
}

/// Scale so the largest magnitude is 1.0; silence is returned unchanged
pub fn peak_normalize(signal: &[f32]) -> MetricResult<Vec<f32>> {
    let mut peak = 0.0f32;
    for &s in signal {
        if !s.is_finite() {
            return Err(MetricError::NonFinite("peak normalization"));
        }
        peak = peak.max(s.abs());
    }

    if peak == 0.0 {
        return Ok(signal.to_vec());
    }
    Ok(signal.iter().map(|s| s / peak).collect())
}
