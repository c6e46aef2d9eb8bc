//! Configuration types for enhancement and the job service

use std::path::{Path, PathBuf};

use af_dsp::{PostFilterConfig, StftConfig, audio};
use af_metrics::EvalConfig;
use serde::{Deserialize, Serialize};

use crate::error::{EnhanceError, EnhanceResult};

/// Signal path configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Pipeline sample rate (input is resampled to it, output written at it)
    pub sample_rate: u32,

    /// Spectral transform
    pub stft: StftConfig,

    /// Low-pass applied after reconstruction
    pub post_filter: PostFilterConfig,

    /// Output WAV bit depth (16, 24 or 32 float)
    pub wav_bit_depth: u16,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            sample_rate: audio::SAMPLE_RATE,
            stft: StftConfig::default(),
            post_filter: PostFilterConfig::default(),
            wav_bit_depth: 16,
        }
    }
}

impl EnhanceConfig {
    /// No post-filter, float output, unbounded dB range
    pub fn transparent() -> Self {
        Self {
            stft: StftConfig::lossless(),
            post_filter: PostFilterConfig::disabled(),
            wav_bit_depth: 32,
            ..Default::default()
        }
    }

    pub fn with_post_filter(mut self, post_filter: PostFilterConfig) -> Self {
        self.post_filter = post_filter;
        self
    }

    pub fn with_bit_depth(mut self, bits: u16) -> Self {
        self.wav_bit_depth = bits;
        self
    }

    pub fn validate(&self) -> EnhanceResult<()> {
        if self.sample_rate == 0 {
            return Err(EnhanceError::Config("sample_rate must be positive".into()));
        }
        if !matches!(self.wav_bit_depth, 16 | 24 | 32) {
            return Err(EnhanceError::Config(format!(
                "unsupported WAV bit depth {}",
                self.wav_bit_depth
            )));
        }
        if self.post_filter.enabled
            && self.post_filter.cutoff_hz >= self.sample_rate as f64 / 2.0
        {
            return Err(EnhanceError::Config(format!(
                "post-filter cutoff {} Hz above Nyquist",
                self.post_filter.cutoff_hz
            )));
        }
        Ok(())
    }
}

/// Persisted model artefacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifacts {
    /// Frame model graph
    pub model_path: PathBuf,
    /// Normalization stats JSON `{"mean": .., "std": ..}`
    pub stats_path: PathBuf,
}

impl Default for ModelArtifacts {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/frame_model.onnx"),
            stats_path: PathBuf::from("models/norm_stats.json"),
        }
    }
}

impl ModelArtifacts {
    /// Artefacts under `dir` with the default file names
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            model_path: dir.join("frame_model.onnx"),
            stats_path: dir.join("norm_stats.json"),
        }
    }

    /// Both files exist
    pub fn is_available(&self) -> bool {
        self.model_path.is_file() && self.stats_path.is_file()
    }

    /// Names of the missing files, for launcher diagnostics
    pub fn missing(&self) -> Vec<PathBuf> {
        [&self.model_path, &self.stats_path]
            .into_iter()
            .filter(|p| !p.is_file())
            .cloned()
            .collect()
    }
}

/// Job service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory receiving `enhanced_<job_id>.wav`
    pub output_dir: PathBuf,

    /// Worker threads
    pub workers: usize,

    /// Jobs that may wait for a worker before submissions are rejected
    pub queue_capacity: usize,

    /// Signal path
    pub enhance: EnhanceConfig,

    /// Metrics
    pub eval: EvalConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            workers: 2,
            queue_capacity: 16,
            enhance: EnhanceConfig::default(),
            eval: EvalConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> EnhanceResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| EnhanceError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EnhanceResult<()> {
        if self.workers == 0 {
            return Err(EnhanceError::Config("workers must be >= 1".into()));
        }
        self.enhance.validate()
    }
}
