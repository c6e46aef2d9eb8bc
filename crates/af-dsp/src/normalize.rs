//! Z-score normalization of dB spectra with persisted statistics

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};

/// Standard deviations smaller than this cannot be divided by
const MIN_STD: f32 = 1e-8;

/// Global mean / standard deviation of training-time dB spectra
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub mean: f32,
    pub std: f32,
}

impl NormalizationStats {
    /// Validated constructor
    pub fn new(mean: f32, std: f32) -> DspResult<Self> {
        let stats = Self { mean, std };
        stats.validate()?;
        Ok(stats)
    }

    /// Reject non-finite values and a near-zero spread
    pub fn validate(&self) -> DspResult<()> {
        if !self.mean.is_finite() || !self.std.is_finite() || self.std.abs() < MIN_STD {
            return Err(DspError::DegenerateStats {
                mean: self.mean,
                std: self.std,
            });
        }
        Ok(())
    }

    /// Population mean / std over every element of every matrix
    pub fn fit<'a, I>(spectra: I) -> DspResult<Self>
    where
        I: IntoIterator<Item = ArrayView2<'a, f32>>,
    {
        let mut count = 0usize;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;

        for spectrum in spectra {
            for &v in spectrum.iter() {
                let v = v as f64;
                sum += v;
                sum_sq += v * v;
                count += 1;
            }
        }

        if count == 0 {
            return Err(DspError::EmptySignal("no spectra to fit statistics on".into()));
        }

        let mean = sum / count as f64;
        let var = (sum_sq / count as f64 - mean * mean).max(0.0);

        Self::new(mean as f32, var.sqrt() as f32)
    }

    /// Load from a JSON document `{"mean": .., "std": ..}`
    pub fn load(path: impl AsRef<Path>) -> DspResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let stats: Self = serde_json::from_str(&content)?;
        stats.validate()?;
        log::debug!(
            "Loaded normalization stats from {}: mean={:.3}, std={:.3}",
            path.as_ref().display(),
            stats.mean,
            stats.std
        );
        Ok(stats)
    }

    /// Persist as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> DspResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Applies a fixed pair of statistics in both directions
#[derive(Debug, Clone, Copy)]
pub struct FrameNormalizer {
    stats: NormalizationStats,
}

impl FrameNormalizer {
    pub fn new(stats: NormalizationStats) -> DspResult<Self> {
        stats.validate()?;
        Ok(Self { stats })
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    /// `(x - mean) / std`
    pub fn normalize(&self, spectrum: ArrayView2<f32>) -> Array2<f32> {
        let NormalizationStats { mean, std } = self.stats;
        spectrum.mapv(|v| (v - mean) / std)
    }

    /// `x * std + mean`
    pub fn denormalize(&self, spectrum: ArrayView2<f32>) -> Array2<f32> {
        let NormalizationStats { mean, std } = self.stats;
        spectrum.mapv(|v| v * std + mean)
    }
}
