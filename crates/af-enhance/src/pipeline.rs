//! Enhancement pipeline
//!
//! Decode → STFT → normalize → frame model → denormalize → ISTFT with the
//! noisy phase → low-pass → WAV. Progress is reported at fixed checkpoints:
//!
//! | %  | stage reached                        |
//! |----|--------------------------------------|
//! | 10 | input validated                      |
//! | 30 | spectral features extracted          |
//! | 60 | model prediction done                |
//! | 80 | waveform reconstructed and filtered  |
//! | 90 | output encoded and written           |
//!
//! 100 is reserved for the job tracker's completion transition.

use af_dsp::{ButterworthLowpass, FrameNormalizer, NormalizationStats, SpectralCodec};
use ndarray::Array2;

use crate::audio::{AudioSource, encode_wav};
use crate::config::EnhanceConfig;
use crate::error::{EnhanceError, EnhanceResult};
use crate::model::FrameModel;
use crate::sink::OutputSink;

/// Progress checkpoints
pub mod progress {
    pub const VALIDATED: u8 = 10;
    pub const FEATURES: u8 = 30;
    pub const PREDICTED: u8 = 60;
    pub const RECONSTRUCTED: u8 = 80;
    pub const WRITTEN: u8 = 90;
}

/// Output of one enhancement run
#[derive(Debug, Clone)]
pub struct EnhancedAudio {
    /// Enhanced waveform at `sample_rate`
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// STFT frames of the input
    pub input_frames: usize,
    /// Frames returned by the model (may be fewer)
    pub output_frames: usize,
}

impl EnhancedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Stateless enhancement engine; safe to share between workers
#[derive(Debug)]
pub struct Enhancer {
    config: EnhanceConfig,
    codec: SpectralCodec,
    post_filter: Option<ButterworthLowpass>,
}

impl Enhancer {
    pub fn new(config: EnhanceConfig) -> EnhanceResult<Self> {
        config.validate()?;

        let codec = SpectralCodec::new(config.stft)?;
        let post_filter = if config.post_filter.enabled {
            Some(ButterworthLowpass::from_config(
                &config.post_filter,
                config.sample_rate,
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            codec,
            post_filter,
        })
    }

    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    /// Enhance a waveform already at the pipeline rate
    ///
    /// The sink receives the complete WAV or nothing. `progress` is called
    /// with each checkpoint in increasing order.
    pub fn enhance(
        &self,
        noisy: &[f32],
        model: &dyn FrameModel,
        stats: &NormalizationStats,
        sink: &mut OutputSink,
        progress: Option<&dyn Fn(u8)>,
    ) -> EnhanceResult<EnhancedAudio> {
        let report = |pct: u8| {
            if let Some(cb) = progress {
                cb(pct);
            }
        };

        if noisy.is_empty() {
            return Err(EnhanceError::Input("empty waveform".into()));
        }
        if noisy.iter().any(|s| !s.is_finite()) {
            return Err(EnhanceError::Input("waveform contains NaN or Inf".into()));
        }
        if !sink.has_target() {
            return Err(EnhanceError::Config("output sink has no target".into()));
        }
        let normalizer = FrameNormalizer::new(*stats)?;
        report(progress::VALIDATED);

        let spectrogram = self.codec.analyze(noisy)?;
        let input_frames = spectrogram.num_frames();
        let features = normalizer.normalize(spectrogram.magnitude_db.view());
        report(progress::FEATURES);

        log::debug!(
            "Running {} on {} frames x {} bins",
            model.name(),
            input_frames,
            spectrogram.num_bins()
        );
        let predicted = model.predict(features.view())?;
        let output_frames = self.check_prediction(&predicted, input_frames)?;
        report(progress::PREDICTED);

        let magnitude_db = normalizer.denormalize(predicted.view());
        let mut samples = self
            .codec
            .synthesize(magnitude_db.view(), spectrogram.phase.view())?;
        if let Some(filter) = &self.post_filter {
            samples = filter.apply(&samples);
        }
        report(progress::RECONSTRUCTED);

        let wav = encode_wav(&samples, self.config.sample_rate, self.config.wav_bit_depth)?;
        sink.write(&wav)?;
        report(progress::WRITTEN);

        log::info!(
            "Enhanced {} samples ({} frames) with {}",
            samples.len(),
            output_frames,
            model.name()
        );

        Ok(EnhancedAudio {
            samples,
            sample_rate: self.config.sample_rate,
            input_frames,
            output_frames,
        })
    }

    /// Decode `source` at the pipeline rate, then [`Enhancer::enhance`]
    ///
    /// Returns the decoded input alongside the result.
    pub fn enhance_source(
        &self,
        source: &AudioSource,
        model: &dyn FrameModel,
        stats: &NormalizationStats,
        sink: &mut OutputSink,
        progress: Option<&dyn Fn(u8)>,
    ) -> EnhanceResult<(Vec<f32>, EnhancedAudio)> {
        let noisy = source.decode(self.config.sample_rate)?;
        let enhanced = self.enhance(&noisy, model, stats, sink, progress)?;
        Ok((noisy, enhanced))
    }

    fn check_prediction(&self, predicted: &Array2<f32>, input_frames: usize) -> EnhanceResult<usize> {
        let (frames, bins) = predicted.dim();
        let expected_bins = self.codec.num_bins();

        if bins != expected_bins {
            return Err(EnhanceError::Reconstruction(format!(
                "model returned {bins} bins, expected {expected_bins}"
            )));
        }
        if frames == 0 {
            return Err(EnhanceError::ModelInvocation("model returned no frames".into()));
        }
        if frames > input_frames {
            return Err(EnhanceError::ModelInvocation(format!(
                "model returned {frames} frames for {input_frames} input frames"
            )));
        }
        if predicted.iter().any(|v| !v.is_finite()) {
            return Err(EnhanceError::ModelInvocation(
                "model output contains NaN or Inf".into(),
            ));
        }
        if frames < input_frames {
            log::warn!(
                "Model returned {} of {} frames, output will be shorter",
                frames,
                input_frames
            );
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdentityModel, ModelError};
    use af_dsp::PostFilterConfig;
    use ndarray::{ArrayView2, s};
    use parking_lot::Mutex;

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 300.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    fn stats() -> NormalizationStats {
        NormalizationStats::new(-30.0, 20.0).unwrap()
    }

    struct DropTail(usize);

    impl FrameModel for DropTail {
        fn predict(&self, frames: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
            let keep = frames.nrows().saturating_sub(self.0);
            Ok(frames.slice(s![..keep, ..]).to_owned())
        }
    }

    struct Constant(Array2<f32>);

    impl FrameModel for Constant {
        fn predict(&self, _frames: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl FrameModel for Failing {
        fn predict(&self, _frames: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
            Err(ModelError::InferenceFailed {
                reason: "backend unavailable".into(),
            })
        }
    }

    #[test]
    fn test_identity_transparent_reconstruction() {
        let enhancer = Enhancer::new(EnhanceConfig::transparent()).unwrap();
        let input = tone(16000);
        let mut sink = OutputSink::new().to_buffer();

        let out = enhancer
            .enhance(&input, &IdentityModel, &stats(), &mut sink, None)
            .unwrap();

        assert_eq!(out.input_frames, 122);
        assert_eq!(out.output_frames, 122);
        assert_eq!(out.samples.len(), 16000);
        // Interior samples (away from the first/last half window) are exact
        for i in 512..15488 {
            assert!((out.samples[i] - input[i]).abs() < 1e-3, "sample {i}");
        }
        assert_eq!(&sink.buffer().unwrap()[..4], b"RIFF");
    }

    #[test]
    fn test_progress_checkpoints() {
        let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
        let seen = Mutex::new(Vec::new());
        let cb = |p: u8| seen.lock().push(p);
        let mut sink = OutputSink::new().to_buffer();

        enhancer
            .enhance(&tone(4000), &IdentityModel, &stats(), &mut sink, Some(&cb))
            .unwrap();

        assert_eq!(*seen.lock(), vec![10, 30, 60, 80, 90]);
    }

    #[test]
    fn test_fewer_frames_shortens_output() {
        let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
        let mut sink = OutputSink::new().to_buffer();

        let out = enhancer
            .enhance(&tone(16000), &DropTail(2), &stats(), &mut sink, None)
            .unwrap();

        assert_eq!(out.output_frames, 120);
        assert_eq!(out.samples.len(), 512 + 128 * 119);
    }

    #[test]
    fn test_input_too_short() {
        let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
        let mut sink = OutputSink::new().to_buffer();
        let err = enhancer
            .enhance(&tone(100), &IdentityModel, &stats(), &mut sink, None)
            .unwrap_err();
        assert!(matches!(err, EnhanceError::Input(_)));
        assert!(sink.buffer().is_none());
    }

    #[test]
    fn test_empty_and_non_finite_input() {
        let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
        let mut sink = OutputSink::new().to_buffer();
        assert!(matches!(
            enhancer.enhance(&[], &IdentityModel, &stats(), &mut sink, None),
            Err(EnhanceError::Input(_))
        ));

        let mut input = tone(2000);
        input[10] = f32::NAN;
        assert!(matches!(
            enhancer.enhance(&input, &IdentityModel, &stats(), &mut sink, None),
            Err(EnhanceError::Input(_))
        ));
    }

    #[test]
    fn test_degenerate_stats_rejected_before_work() {
        let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
        let mut sink = OutputSink::new().to_buffer();
        let seen = Mutex::new(Vec::new());
        let cb = |p: u8| seen.lock().push(p);
        let stats = NormalizationStats { mean: 0.0, std: 0.0 };

        let err = enhancer
            .enhance(&tone(2000), &IdentityModel, &stats, &mut sink, Some(&cb))
            .unwrap_err();
        assert!(matches!(err, EnhanceError::DegenerateStats { .. }));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_model_failures() {
        let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
        let mut sink = OutputSink::new().to_buffer();
        let input = tone(2000);

        let err = enhancer
            .enhance(&input, &Failing, &stats(), &mut sink, None)
            .unwrap_err();
        assert!(matches!(err, EnhanceError::ModelInvocation(_)));

        let nan = Constant(Array2::from_elem((5, 257), f32::NAN));
        let err = enhancer
            .enhance(&input, &nan, &stats(), &mut sink, None)
            .unwrap_err();
        assert!(matches!(err, EnhanceError::ModelInvocation(_)));

        let too_many = Constant(Array2::zeros((500, 257)));
        let err = enhancer
            .enhance(&input, &too_many, &stats(), &mut sink, None)
            .unwrap_err();
        assert!(matches!(err, EnhanceError::ModelInvocation(_)));

        let wrong_bins = Constant(Array2::zeros((5, 100)));
        let err = enhancer
            .enhance(&input, &wrong_bins, &stats(), &mut sink, None)
            .unwrap_err();
        assert!(matches!(err, EnhanceError::Reconstruction(_)));

        assert!(sink.buffer().is_none());
    }

    #[test]
    fn test_post_filter_attenuates_high_band() {
        let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
        let mut sink = OutputSink::new().to_buffer();
        let high: Vec<f32> = (0..16000)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 7000.0 * i as f32 / 16000.0).sin())
            .collect();

        let out = enhancer
            .enhance(&high, &IdentityModel, &stats(), &mut sink, None)
            .unwrap();

        let rms = |x: &[f32]| (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt();
        assert!(rms(&out.samples[1000..15000]) < 0.01 * rms(&high[1000..15000]));
    }

    #[test]
    fn test_enhance_source_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enhanced.wav");
        let enhancer = Enhancer::new(
            EnhanceConfig::default().with_post_filter(PostFilterConfig::disabled()),
        )
        .unwrap();

        let wav = encode_wav(&tone(8000), 16000, 16).unwrap();
        let mut sink = OutputSink::new().to_path(&path);
        let (noisy, out) = enhancer
            .enhance_source(&AudioSource::Bytes(wav), &IdentityModel, &stats(), &mut sink, None)
            .unwrap();

        assert_eq!(noisy.len(), 8000);
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len() as usize, out.samples.len());
    }

    #[test]
    fn test_invalid_config() {
        let config = EnhanceConfig::default().with_bit_depth(12);
        assert!(matches!(Enhancer::new(config), Err(EnhanceError::Config(_))));
    }
}
