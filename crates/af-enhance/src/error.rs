//! Error types for the enhancement pipeline

use af_dsp::DspError;
use thiserror::Error;

use crate::model::ModelError;

/// Enhancement error types
#[derive(Error, Debug)]
pub enum EnhanceError {
    /// Malformed, empty or undecodable audio
    #[error("Invalid input audio: {0}")]
    Input(String),

    /// The frame model failed or produced unusable output
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    /// Spectral matrices could not be turned back into a waveform
    #[error("Reconstruction failed: {0}")]
    Reconstruction(String),

    /// Normalization std is zero, near zero or non-finite
    #[error("Degenerate normalization stats: mean={mean}, std={std}")]
    DegenerateStats { mean: f32, std: f32 },

    /// WAV encoding failed
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker queue is saturated
    #[error("Job rejected: queue full ({capacity} pending)")]
    Rejected { capacity: usize },

    /// Unknown job or output reference
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<DspError> for EnhanceError {
    fn from(err: DspError) -> Self {
        match err {
            DspError::SignalTooShort { .. } | DspError::EmptySignal(_) | DspError::Resample(_) => {
                EnhanceError::Input(err.to_string())
            }
            DspError::ShapeMismatch { .. } | DspError::Fft(_) => {
                EnhanceError::Reconstruction(err.to_string())
            }
            DspError::DegenerateStats { mean, std } => EnhanceError::DegenerateStats { mean, std },
            DspError::InvalidConfig(msg) => EnhanceError::Config(msg),
            DspError::Serialization(e) => EnhanceError::Config(e.to_string()),
            DspError::Io(e) => EnhanceError::Io(e),
        }
    }
}

impl From<ModelError> for EnhanceError {
    fn from(err: ModelError) -> Self {
        EnhanceError::ModelInvocation(err.to_string())
    }
}

/// Result type for enhancement operations
pub type EnhanceResult<T> = Result<T, EnhanceError>;
