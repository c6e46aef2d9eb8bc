//! Error types for spectral processing

use thiserror::Error;

/// DSP error types
#[derive(Error, Debug)]
pub enum DspError {
    /// Waveform shorter than a single analysis window
    #[error("Signal too short: need {needed} samples, got {got}")]
    SignalTooShort { needed: usize, got: usize },

    /// Empty waveform or feature matrix
    #[error("Empty signal: {0}")]
    EmptySignal(String),

    /// Matrix shapes that cannot be reconciled
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Normalization statistics unusable for division
    #[error("Degenerate normalization stats: mean={mean}, std={std}")]
    DegenerateStats { mean: f32, std: f32 },

    /// Invalid codec or filter configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// FFT failure
    #[error("FFT error: {0}")]
    Fft(String),

    /// Sample rate conversion failure
    #[error("Resample error: {0}")]
    Resample(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for DSP operations
pub type DspResult<T> = Result<T, DspError>;
