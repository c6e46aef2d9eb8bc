//! Fail-soft quality evaluation
//!
//! Every sub-metric is computed independently as a `MetricResult<f64>`. The
//! merge step writes `0.0` for a failed metric and records the cause in
//! [`MetricsBundle::degraded`], so the bundle is always fully populated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::align::align;
use crate::error::{MetricError, MetricResult};
use crate::pesq::pesq;
use crate::snr::{global_snr, segmental_snr};
use crate::stats::SignalStats;
use crate::stoi::stoi;

/// Evaluation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Cross-correlation alignment before scoring
    pub align: bool,
    /// Alignment search limit (samples); None = quarter of the shorter signal
    pub max_delay: Option<usize>,
    /// Segmental SNR frame length
    pub seg_frame_len: usize,
    /// Segmental SNR hop
    pub seg_hop: usize,
    /// Minimum PESQ input duration
    pub pesq_min_seconds: f64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            align: true,
            max_delay: None,
            seg_frame_len: 512,
            seg_hop: 256,
            pesq_min_seconds: 0.25,
        }
    }
}

impl EvalConfig {
    /// Short-frame segmental SNR profile (160 / 80)
    pub fn narrowband() -> Self {
        Self {
            seg_frame_len: 160,
            seg_hop: 80,
            ..Default::default()
        }
    }

    /// Compare sample-for-sample without alignment
    pub fn unaligned() -> Self {
        Self {
            align: false,
            ..Default::default()
        }
    }
}

/// Metric identifiers (also the keys of [`MetricsBundle::to_map`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    SegSnr,
    Snr,
    Pesq,
    Stoi,
    DurationS,
    Rms,
    DynamicRangeDb,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::SegSnr,
        Metric::Snr,
        Metric::Pesq,
        Metric::Stoi,
        Metric::DurationS,
        Metric::Rms,
        Metric::DynamicRangeDb,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::SegSnr => "seg_snr",
            Metric::Snr => "snr",
            Metric::Pesq => "pesq",
            Metric::Stoi => "stoi",
            Metric::DurationS => "duration_s",
            Metric::Rms => "rms",
            Metric::DynamicRangeDb => "dynamic_range_db",
        }
    }
}

/// Quality scores of one enhanced signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsBundle {
    /// Segmental SNR (dB)
    pub seg_snr: f64,
    /// Global SNR (dB)
    pub snr: f64,
    /// PESQ-style MOS-LQO
    pub pesq: f64,
    /// Short-time objective intelligibility
    pub stoi: f64,
    /// Test signal duration (seconds)
    pub duration_s: f64,
    /// Test signal RMS amplitude
    pub rms: f64,
    /// Test signal peak-to-RMS ratio (dB)
    pub dynamic_range_db: f64,
    /// Metrics that fell back to 0.0, with the cause
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub degraded: BTreeMap<Metric, String>,
}

impl MetricsBundle {
    /// All zeros, every metric marked degraded with `cause`
    pub fn fallback(cause: &str) -> Self {
        Self {
            degraded: Metric::ALL.iter().map(|m| (*m, cause.to_string())).collect(),
            ..Default::default()
        }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::SegSnr => self.seg_snr,
            Metric::Snr => self.snr,
            Metric::Pesq => self.pesq,
            Metric::Stoi => self.stoi,
            Metric::DurationS => self.duration_s,
            Metric::Rms => self.rms,
            Metric::DynamicRangeDb => self.dynamic_range_db,
        }
    }

    fn set(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::SegSnr => self.seg_snr = value,
            Metric::Snr => self.snr = value,
            Metric::Pesq => self.pesq = value,
            Metric::Stoi => self.stoi = value,
            Metric::DurationS => self.duration_s = value,
            Metric::Rms => self.rms = value,
            Metric::DynamicRangeDb => self.dynamic_range_db = value,
        }
    }

    /// Merge one sub-metric result
    fn record(&mut self, metric: Metric, result: MetricResult<f64>) {
        match result {
            Ok(value) => self.set(metric, value),
            Err(err) => {
                log::warn!("Metric {} degraded: {}", metric.name(), err);
                self.set(metric, 0.0);
                self.degraded.insert(metric, err.to_string());
            }
        }
    }

    pub fn is_degraded(&self, metric: Metric) -> bool {
        self.degraded.contains_key(&metric)
    }

    /// Flat name -> value mapping with every key present
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        Metric::ALL.iter().map(|m| (m.name(), self.get(*m))).collect()
    }
}

/// Scores an enhanced signal against a reference
#[derive(Debug, Clone, Default)]
pub struct QualityEvaluator {
    config: EvalConfig,
}

impl QualityEvaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Never fails; invalid input yields an all-zero, fully degraded bundle
    pub fn evaluate(&self, reference: &[f32], test: &[f32], sample_rate: u32) -> MetricsBundle {
        match self.try_evaluate(reference, test, sample_rate) {
            Ok(bundle) => bundle,
            Err(err) => {
                log::warn!("Evaluation rejected input: {}", err);
                MetricsBundle::fallback(&err.to_string())
            }
        }
    }

    /// Validates input, then computes every metric fail-soft
    pub fn try_evaluate(
        &self,
        reference: &[f32],
        test: &[f32],
        sample_rate: u32,
    ) -> MetricResult<MetricsBundle> {
        if reference.is_empty() || test.is_empty() {
            return Err(MetricError::InvalidSignal("empty signal".into()));
        }
        if sample_rate == 0 {
            return Err(MetricError::InvalidSignal("sample rate must be positive".into()));
        }
        if reference.iter().chain(test).any(|s| !s.is_finite()) {
            return Err(MetricError::NonFinite("evaluation input"));
        }

        let (reference, test) = if self.config.align {
            align(reference, test, self.config.max_delay)
        } else {
            let len = reference.len().min(test.len());
            (reference[..len].to_vec(), test[..len].to_vec())
        };

        let mut bundle = MetricsBundle::default();

        bundle.record(
            Metric::SegSnr,
            segmental_snr(&reference, &test, self.config.seg_frame_len, self.config.seg_hop),
        );
        bundle.record(Metric::Snr, global_snr(&reference, &test));
        bundle.record(
            Metric::Pesq,
            pesq(&reference, &test, sample_rate, self.config.pesq_min_seconds),
        );
        bundle.record(Metric::Stoi, stoi(&reference, &test, sample_rate));

        let stats = SignalStats::measure(&test, sample_rate);
        bundle.record(Metric::DurationS, stats.clone().map(|s| s.duration_s));
        bundle.record(Metric::Rms, stats.clone().map(|s| s.rms));
        bundle.record(
            Metric::DynamicRangeDb,
            stats.and_then(|s| s.dynamic_range_db()),
        );

        log::debug!(
            "Evaluated {} samples: seg_snr={:.2}, snr={:.2}, pesq={:.2}, stoi={:.3}",
            test.len(),
            bundle.seg_snr,
            bundle.snr,
            bundle.pesq,
            bundle.stoi
        );

        Ok(bundle)
    }
}
