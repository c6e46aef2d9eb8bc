//! Metric error types

use thiserror::Error;

/// Errors produced by a single metric computation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Signal too short: need {needed} samples, got {got}")]
    TooShort { needed: usize, got: usize },

    #[error("Non-finite sample in {0}")]
    NonFinite(&'static str),

    #[error("Degenerate signal: {0}")]
    Degenerate(String),

    #[error("Resampling failed: {0}")]
    Resample(String),
}

impl From<af_dsp::DspError> for MetricError {
    fn from(err: af_dsp::DspError) -> Self {
        match err {
            af_dsp::DspError::SignalTooShort { needed, got } => MetricError::TooShort { needed, got },
            af_dsp::DspError::Resample(msg) => MetricError::Resample(msg),
            other => MetricError::Degenerate(other.to_string()),
        }
    }
}

pub type MetricResult<T> = Result<T, MetricError>;
