//! Short-time Fourier codec
//!
//! Forward: periodic Hann window, non-centred frames,
//! `frames = 1 + (len - n_fft) / hop`, magnitude in dB.
//! Inverse: dB back to amplitude, recombined with a stored phase matrix,
//! overlap-added with window-square normalization.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::audio;
use crate::error::{DspError, DspResult};

/// Window-square sums below this are treated as uncovered samples
const WINDOW_SUM_FLOOR: f32 = 1e-10;

/// STFT configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftConfig {
    /// Window / FFT length
    pub n_fft: usize,
    /// Hop between frames
    pub hop_length: usize,
    /// Amplitude floor before the dB conversion
    pub amin: f32,
    /// Dynamic range kept below the loudest bin (None = unbounded)
    pub top_db: Option<f32>,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            n_fft: audio::N_FFT,
            hop_length: audio::HOP_LENGTH,
            amin: 1e-5,
            top_db: Some(80.0),
        }
    }
}

impl StftConfig {
    /// Configuration without a dynamic range floor (lossless dB mapping)
    pub fn lossless() -> Self {
        Self {
            amin: 1e-10,
            top_db: None,
            ..Default::default()
        }
    }

    /// Number of frequency bins per frame
    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Frames produced for a waveform of `len` samples
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.n_fft {
            0
        } else {
            1 + (len - self.n_fft) / self.hop_length
        }
    }
}

/// Result of the forward transform; every matrix is frames x bins
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Magnitude in dB
    pub magnitude_db: Array2<f32>,
    /// Phase angle (radians)
    pub phase: Array2<f32>,
    /// Complex transform
    pub spectrum: Array2<Complex32>,
}

impl Spectrogram {
    pub fn num_frames(&self) -> usize {
        self.magnitude_db.nrows()
    }

    pub fn num_bins(&self) -> usize {
        self.magnitude_db.ncols()
    }
}

/// Magnitude/phase codec with a fixed transform configuration
pub struct SpectralCodec {
    config: StftConfig,
    window: Vec<f32>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl std::fmt::Debug for SpectralCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralCodec").field("config", &self.config).finish()
    }
}

impl SpectralCodec {
    /// Create a codec; `n_fft` must be even and `hop_length` in `1..=n_fft`
    pub fn new(config: StftConfig) -> DspResult<Self> {
        if config.n_fft < 2 || config.n_fft % 2 != 0 {
            return Err(DspError::InvalidConfig(format!(
                "n_fft must be even and >= 2, got {}",
                config.n_fft
            )));
        }
        if config.hop_length == 0 || config.hop_length > config.n_fft {
            return Err(DspError::InvalidConfig(format!(
                "hop_length must be in 1..={}, got {}",
                config.n_fft, config.hop_length
            )));
        }
        if !(config.amin > 0.0) {
            return Err(DspError::InvalidConfig("amin must be positive".into()));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(config.n_fft);
        let inverse = planner.plan_fft_inverse(config.n_fft);

        // Periodic Hann
        let window: Vec<f32> = (0..config.n_fft)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / config.n_fft as f32).cos())
            })
            .collect();

        Ok(Self {
            config,
            window,
            forward,
            inverse,
        })
    }

    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    pub fn num_bins(&self) -> usize {
        self.config.num_bins()
    }

    /// Forward transform of a waveform
    pub fn analyze(&self, waveform: &[f32]) -> DspResult<Spectrogram> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;

        if waveform.len() < n_fft {
            return Err(DspError::SignalTooShort {
                needed: n_fft,
                got: waveform.len(),
            });
        }

        let frames = self.config.frame_count(waveform.len());
        let bins = self.num_bins();

        let mut spectrum = Array2::from_elem((frames, bins), Complex32::new(0.0, 0.0));
        let mut input = self.forward.make_input_vec();
        let mut output = self.forward.make_output_vec();
        let mut scratch = self.forward.make_scratch_vec();

        for (frame_idx, mut row) in spectrum.rows_mut().into_iter().enumerate() {
            let start = frame_idx * hop;
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = waveform[start + i] * self.window[i];
            }

            self.forward
                .process_with_scratch(&mut input, &mut output, &mut scratch)
                .map_err(|e| DspError::Fft(e.to_string()))?;

            for (dst, src) in row.iter_mut().zip(output.iter()) {
                *dst = *src;
            }
        }

        let magnitude_db = self.amplitude_to_db(&spectrum);
        let phase = spectrum.mapv(|c| c.arg());

        Ok(Spectrogram {
            magnitude_db,
            phase,
            spectrum,
        })
    }

    /// Inverse transform reusing a stored phase matrix
    ///
    /// When the two matrices disagree on frame count the longer one is
    /// truncated to the shorter; disagreeing bin counts are an error.
    pub fn synthesize(
        &self,
        magnitude_db: ArrayView2<f32>,
        phase: ArrayView2<f32>,
    ) -> DspResult<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let bins = self.num_bins();

        let (pred_frames, pred_bins) = magnitude_db.dim();
        let (phase_frames, phase_bins) = phase.dim();

        if pred_bins != bins || phase_bins != bins {
            return Err(DspError::ShapeMismatch {
                expected: format!("{bins} bins"),
                got: format!("magnitude {pred_bins} bins, phase {phase_bins} bins"),
            });
        }

        let frames = pred_frames.min(phase_frames);
        if frames == 0 {
            return Err(DspError::EmptySignal("no frames to synthesize".into()));
        }
        if pred_frames != phase_frames {
            log::debug!(
                "Frame count mismatch (magnitude {}, phase {}), truncating to {}",
                pred_frames,
                phase_frames,
                frames
            );
        }

        let out_len = n_fft + hop * (frames - 1);
        let mut output = vec![0.0f32; out_len];
        let mut window_sum = vec![0.0f32; out_len];

        let mut spectrum = self.inverse.make_input_vec();
        let mut frame = self.inverse.make_output_vec();
        let mut scratch = self.inverse.make_scratch_vec();
        let scale = 1.0 / n_fft as f32;

        for f in 0..frames {
            for (b, bin) in spectrum.iter_mut().enumerate() {
                let amplitude = 10.0f32.powf(magnitude_db[[f, b]] / 20.0);
                *bin = Complex32::from_polar(amplitude, phase[[f, b]]);
            }
            // DC and Nyquist must be real for the inverse real FFT
            spectrum[0].im = 0.0;
            spectrum[bins - 1].im = 0.0;

            self.inverse
                .process_with_scratch(&mut spectrum, &mut frame, &mut scratch)
                .map_err(|e| DspError::Fft(e.to_string()))?;

            let start = f * hop;
            for (i, &w) in self.window.iter().enumerate() {
                output[start + i] += frame[i] * scale * w;
                window_sum[start + i] += w * w;
            }
        }

        for (sample, &norm) in output.iter_mut().zip(window_sum.iter()) {
            if norm > WINDOW_SUM_FLOOR {
                *sample /= norm;
            }
        }

        Ok(output)
    }

    /// `20 * log10(max(amin, |X|))`, floored at `max - top_db`
    fn amplitude_to_db(&self, spectrum: &Array2<Complex32>) -> Array2<f32> {
        let amin = self.config.amin;
        let mut db = spectrum.mapv(|c| 20.0 * c.norm().max(amin).log10());

        if let Some(top_db) = self.config.top_db {
            let max_db = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let floor = max_db - top_db;
            db.mapv_inplace(|v| v.max(floor));
        }

        db
    }
}

/// dB value back to linear amplitude
pub fn db_to_amplitude(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}
