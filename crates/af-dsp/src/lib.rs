//! # af-dsp
//!
//! Signal path shared by the Audify enhancer and evaluator:
//! - `stft` - magnitude/phase analysis and phase-preserving resynthesis
//! - `normalize` - global affine normalization of dB frames
//! - `biquad` / `filter` - TDF-II sections and the Butterworth post-filter
//! - `resample` - band-limited sample rate conversion
//!
//! ## Usage
//!
//! ```rust,ignore
//! use af_dsp::{FrameNormalizer, NormalizationStats, SpectralCodec, StftConfig};
//!
//! let codec = SpectralCodec::new(StftConfig::default())?;
//! let spec = codec.analyze(&waveform)?;
//! let normalizer = FrameNormalizer::new(NormalizationStats::load("models/norm_stats.json")?)?;
//! let frames = normalizer.normalize(spec.magnitude_db.view());
//! let restored = normalizer.denormalize(frames.view());
//! let waveform = codec.synthesize(restored.view(), spec.phase.view())?;
//! ```

pub mod biquad;
pub mod filter;
pub mod normalize;
pub mod resample;
pub mod stft;

mod error;

pub use error::{DspError, DspResult};
pub use filter::{ButterworthLowpass, PostFilterConfig};
pub use normalize::{FrameNormalizer, NormalizationStats};
pub use resample::resample;
pub use stft::{SpectralCodec, Spectrogram, StftConfig};

/// Fixed audio constants of the enhancement pipeline
pub mod audio {
    /// Working sample rate of every waveform in the pipeline
    pub const SAMPLE_RATE: u32 = 16_000;

    /// STFT window length (samples)
    pub const N_FFT: usize = 512;

    /// STFT hop length (samples)
    pub const HOP_LENGTH: usize = 128;

    /// Post-filter cutoff (4 kHz at 16 kHz)
    pub const POST_FILTER_CUTOFF_HZ: f64 = 4_000.0;

    /// Post-filter Butterworth order
    pub const POST_FILTER_ORDER: usize = 6;
}
