//! Frame model capability
//!
//! The learned mapping is opaque: a batch of normalized dB frames
//! (`frames x bins`) in, a batch of the same bin width and the same or fewer
//! frames out. Any backend implements [`FrameModel::predict`].

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use thiserror::Error;

/// Frame model failures
#[derive(Error, Debug)]
pub enum ModelError {
    /// Model file not found
    #[error("Model not found: {path}")]
    NotFound { path: String },

    /// Model loading failed
    #[error("Failed to load model: {reason}")]
    LoadFailed { reason: String },

    /// Inference failed
    #[error("Inference failed: {reason}")]
    InferenceFailed { reason: String },

    /// Output tensor does not fit a frames x bins matrix
    #[error("Invalid output shape: expected {expected}, got {got}")]
    InvalidOutputShape { expected: String, got: String },
}

/// Normalized frames in, normalized frames out
pub trait FrameModel: Send + Sync {
    /// Map a `frames x bins` batch to a `frames' x bins` batch, `frames' <= frames`
    fn predict(&self, frames: ArrayView2<f32>) -> Result<Array2<f32>, ModelError>;

    /// Short name for logs
    fn name(&self) -> &str {
        "frame-model"
    }
}

/// Passthrough model
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityModel;

impl FrameModel for IdentityModel {
    fn predict(&self, frames: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
        Ok(frames.to_owned())
    }

    fn name(&self) -> &str {
        "identity"
    }
}

type TractPlan = tract_onnx::prelude::SimplePlan<
    tract_onnx::prelude::TypedFact,
    Box<dyn tract_onnx::prelude::TypedOp>,
    tract_onnx::prelude::Graph<tract_onnx::prelude::TypedFact, Box<dyn tract_onnx::prelude::TypedOp>>,
>;

/// ONNX frame model executed with tract (pure Rust, CPU)
///
/// The graph takes a single `f32` tensor `[frames, bins]` and returns a tensor
/// whose last axis is `bins`; leading axes are flattened into frames.
pub struct OnnxFrameModel {
    plan: TractPlan,
    name: String,
}

impl std::fmt::Debug for OnnxFrameModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxFrameModel").field("name", &self.name).finish()
    }
}

impl OnnxFrameModel {
    /// Load and optimize an ONNX graph
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self, ModelError> {
        use tract_onnx::prelude::*;

        let path = model_path.as_ref();
        if !path.exists() {
            return Err(ModelError::NotFound {
                path: path.display().to_string(),
            });
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| ModelError::LoadFailed { reason: e.to_string() })?
            .into_optimized()
            .map_err(|e| ModelError::LoadFailed { reason: e.to_string() })?
            .into_runnable()
            .map_err(|e| ModelError::LoadFailed { reason: e.to_string() })?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "onnx".to_string());

        log::info!("Loaded ONNX frame model {} from {}", name, path.display());

        Ok(Self { plan, name })
    }
}

impl FrameModel for OnnxFrameModel {
    fn predict(&self, frames: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
        use tract_onnx::prelude::*;

        let (num_frames, bins) = frames.dim();
        let data: Vec<f32> = frames.iter().copied().collect();

        let input = Tensor::from_shape::<f32>(&[num_frames, bins], &data)
            .map_err(|e| ModelError::InferenceFailed { reason: e.to_string() })?;

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| ModelError::InferenceFailed { reason: e.to_string() })?;

        let output = outputs.first().ok_or_else(|| ModelError::InferenceFailed {
            reason: "model produced no output".into(),
        })?;

        let view = output
            .to_array_view::<f32>()
            .map_err(|e| ModelError::InferenceFailed { reason: e.to_string() })?;

        let shape = view.shape().to_vec();
        if shape.last() != Some(&bins) {
            return Err(ModelError::InvalidOutputShape {
                expected: format!("[.., {bins}]"),
                got: format!("{shape:?}"),
            });
        }

        let out_frames = view.len() / bins;
        let values: Vec<f32> = view.iter().copied().collect();
        Array2::from_shape_vec((out_frames, bins), values).map_err(|e| {
            ModelError::InvalidOutputShape {
                expected: format!("[{out_frames}, {bins}]"),
                got: e.to_string(),
            }
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
