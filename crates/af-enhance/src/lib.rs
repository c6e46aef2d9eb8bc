//! # af-enhance
//!
//! Spectral-mapping speech enhancement for Audify.
//!
//! A noisy recording is decoded to 16 kHz mono, turned into log-magnitude
//! frames, normalized, passed through a learned [`FrameModel`], and rebuilt
//! with its original phase. A Butterworth low-pass removes residual hiss
//! before the result is written as WAV and scored with `af-metrics`.
//!
//! ## Features
//!
//! - **Pipeline**: [`Enhancer`] with fixed progress checkpoints
//! - **Models**: [`OnnxFrameModel`] (tract) or any [`FrameModel`] impl
//! - **Jobs**: [`JobTracker`] registry and [`EnhancementService`] worker pool
//! - **I/O**: WAV/FLAC/MP3/OGG decoding, atomic WAV output
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use af_enhance::{AudioSource, EnhanceRequest, EnhancementService, JobTracker, ModelArtifacts, ServiceConfig};
//!
//! let tracker = Arc::new(JobTracker::new());
//! let service = EnhancementService::from_artifacts(
//!     ServiceConfig::default(),
//!     &ModelArtifacts::default(),
//!     Arc::clone(&tracker),
//! )?;
//!
//! let id = service.submit(EnhanceRequest::new(AudioSource::Path("noisy.wav".into())))?;
//! let snapshot = service.poll(&id);
//! println!("{:?} {}%", snapshot.status, snapshot.progress);
//! ```

pub mod audio;
pub mod config;
pub mod job;
pub mod model;
pub mod pipeline;
pub mod service;
pub mod sink;

mod error;

pub use audio::{AudioSource, encode_wav};
pub use config::{EnhanceConfig, ModelArtifacts, ServiceConfig};
pub use error::{EnhanceError, EnhanceResult};
pub use job::{JobId, JobOutput, JobSnapshot, JobStatus, JobTracker};
pub use model::{FrameModel, IdentityModel, ModelError, OnnxFrameModel};
pub use pipeline::{EnhancedAudio, Enhancer};
pub use service::{EnhanceRequest, EnhancementService};
pub use sink::OutputSink;

pub use af_dsp::{NormalizationStats, PostFilterConfig, StftConfig};
pub use af_metrics::{EvalConfig, MetricsBundle, QualityEvaluator};
