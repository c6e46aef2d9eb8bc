//! # af-metrics
//!
//! Objective quality scoring of enhanced speech against a reference.
//!
//! ## Features
//!
//! - **Alignment**: FFT cross-correlation delay estimate and trimming
//! - **SNR**: segmental (clamped, overlapping frames) and global
//! - **PESQ-style MOS**: Bark-band loudness disturbance model, wideband mapping
//! - **STOI**: one-third octave envelope correlation at 10 kHz
//! - **Stats**: duration, RMS, dynamic range
//!
//! ## Example
//!
//! ```rust,ignore
//! use af_metrics::{EvalConfig, QualityEvaluator};
//!
//! let evaluator = QualityEvaluator::new(EvalConfig::default());
//! let bundle = evaluator.evaluate(&clean, &enhanced, 16_000);
//!
//! println!("PESQ {:.2}, STOI {:.3}", bundle.pesq, bundle.stoi);
//! for (metric, cause) in &bundle.degraded {
//!     println!("{} fell back to 0.0: {}", metric.name(), cause);
//! }
//! ```

pub mod align;
pub mod evaluator;
pub mod pesq;
pub mod snr;
pub mod stats;
pub mod stoi;

mod error;

pub use align::{align, estimate_delay};
pub use error::{MetricError, MetricResult};
pub use evaluator::{EvalConfig, Metric, MetricsBundle, QualityEvaluator};
pub use pesq::pesq;
pub use snr::{global_snr, segmental_snr};
pub use stats::{SignalStats, peak_normalize};
pub use stoi::stoi;
