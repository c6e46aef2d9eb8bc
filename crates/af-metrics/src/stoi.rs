//! Short-time objective intelligibility (Taal et al., 2011)
//!
//! Classic, non-extended STOI: both signals are resampled to 10 kHz, silent
//! frames (40 dB below the loudest reference frame) are dropped, then 15
//! one-third octave band envelopes are correlated over 384 ms segments after
//! clipping the degraded envelope at -15 dB SDR.

use realfft::RealFftPlanner;

use crate::error::{MetricError, MetricResult};
use crate::stats::peak_normalize;

/// Internal processing rate
pub const STOI_RATE: u32 = 10_000;

const FRAME_LEN: usize = 256;
const NFFT: usize = 512;
const NUM_BANDS: usize = 15;
const MIN_FREQ: f64 = 150.0;
/// Frames per intermediate intelligibility segment (384 ms)
const SEGMENT_FRAMES: usize = 30;
/// Lower signal-to-distortion bound (dB)
const BETA: f64 = -15.0;
const DYN_RANGE_DB: f64 = 40.0;

/// Value reported when fewer than one segment of speech remains
pub const TOO_SHORT_SCORE: f64 = 1e-5;

/// Symmetric Hann of length `len + 2` without its zero end points
fn trimmed_hann(len: usize) -> Vec<f64> {
    let m = (len + 2) as f64;
    (1..=len)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / (m - 1.0)).cos())
        .collect()
}

/// One-third octave band matrix: for each band the `[lo, hi)` bin range
fn third_octave_bands() -> Vec<(usize, usize)> {
    let bins = NFFT / 2 + 1;
    let freqs: Vec<f64> = (0..bins)
        .map(|i| i as f64 * STOI_RATE as f64 / NFFT as f64)
        .collect();

    let nearest = |target: f64| -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, &f) in freqs.iter().enumerate() {
            let dist = (f - target).powi(2);
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best
    };

    (0..NUM_BANDS)
        .map(|k| {
            let k = k as f64;
            let lo = MIN_FREQ * 2f64.powf((2.0 * k - 1.0) / 6.0);
            let hi = MIN_FREQ * 2f64.powf((2.0 * k + 1.0) / 6.0);
            (nearest(lo), nearest(hi))
        })
        .collect()
}

/// Drop frames of both signals where `x` is more than `dyn_range` dB below its
/// loudest frame, then overlap-add the kept (windowed) frames back together
fn remove_silent_frames(x: &[f64], y: &[f64], window: &[f64], hop: usize) -> (Vec<f64>, Vec<f64>) {
    let frame_len = window.len();
    if x.len() < frame_len {
        return (Vec::new(), Vec::new());
    }

    let starts: Vec<usize> = (0..=x.len() - frame_len).step_by(hop).collect();
    let energies: Vec<f64> = starts
        .iter()
        .map(|&s| {
            let norm = x[s..s + frame_len]
                .iter()
                .zip(window)
                .map(|(v, w)| (v * w).powi(2))
                .sum::<f64>()
                .sqrt();
            20.0 * (norm + f64::EPSILON).log10()
        })
        .collect();

    let max_energy = energies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let kept: Vec<usize> = starts
        .iter()
        .zip(&energies)
        .filter(|&(_, &e)| e > max_energy - DYN_RANGE_DB)
        .map(|(&s, _)| s)
        .collect();

    if kept.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let out_len = (kept.len() - 1) * hop + frame_len;
    let mut x_out = vec![0.0f64; out_len];
    let mut y_out = vec![0.0f64; out_len];
    for (i, &s) in kept.iter().enumerate() {
        let offset = i * hop;
        for j in 0..frame_len {
            x_out[offset + j] += x[s + j] * window[j];
            y_out[offset + j] += y[s + j] * window[j];
        }
    }

    (x_out, y_out)
}

/// Band envelopes, `bands x frames`
fn band_envelopes(signal: &[f64], window: &[f64], bands: &[(usize, usize)]) -> MetricResult<Vec<Vec<f64>>> {
    let hop = FRAME_LEN / 2;
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(NFFT);
    let mut input = fft.make_input_vec();
    let mut output = fft.make_output_vec();

    let mut envelopes = vec![Vec::new(); bands.len()];
    let mut start = 0;
    while start + FRAME_LEN < signal.len() {
        input.iter_mut().for_each(|v| *v = 0.0);
        for j in 0..FRAME_LEN {
            input[j] = signal[start + j] * window[j];
        }
        fft.process(&mut input, &mut output)
            .map_err(|e| MetricError::Degenerate(format!("FFT failed: {e}")))?;

        for (env, &(lo, hi)) in envelopes.iter_mut().zip(bands) {
            let power: f64 = output[lo..hi].iter().map(|c| c.norm_sqr()).sum();
            env.push(power.sqrt());
        }
        start += hop;
    }

    Ok(envelopes)
}

fn center_and_scale(values: &mut [f64]) {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter_mut().for_each(|v| *v -= mean);
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    values.iter_mut().for_each(|v| *v /= norm + f64::EPSILON);
}

/// Intelligibility of `test` relative to `reference`, in `[-1, 1]` (usually 0..1)
pub fn stoi(reference: &[f32], test: &[f32], sample_rate: u32) -> MetricResult<f64> {
    if reference.is_empty() || test.is_empty() {
        return Err(MetricError::InvalidSignal("empty signal".into()));
    }
    if sample_rate == 0 {
        return Err(MetricError::InvalidSignal("sample rate must be positive".into()));
    }

    let len = reference.len().min(test.len());
    let reference = peak_normalize(&reference[..len])?;
    let test = peak_normalize(&test[..len])?;

    let (reference, test) = if sample_rate == STOI_RATE {
        (reference, test)
    } else {
        (
            af_dsp::resample(&reference, sample_rate, STOI_RATE)?,
            af_dsp::resample(&test, sample_rate, STOI_RATE)?,
        )
    };

    let x: Vec<f64> = reference.iter().map(|&v| v as f64).collect();
    let y: Vec<f64> = test.iter().map(|&v| v as f64).collect();

    let window = trimmed_hann(FRAME_LEN);
    let (x, y) = remove_silent_frames(&x, &y, &window, FRAME_LEN / 2);

    let bands = third_octave_bands();
    let x_env = band_envelopes(&x, &window, &bands)?;
    let y_env = band_envelopes(&y, &window, &bands)?;

    let num_frames = x_env.first().map(Vec::len).unwrap_or(0);
    if num_frames < SEGMENT_FRAMES {
        log::warn!(
            "STOI: only {} speech frames (need {}), returning {}",
            num_frames,
            SEGMENT_FRAMES,
            TOO_SHORT_SCORE
        );
        return Ok(TOO_SHORT_SCORE);
    }

    let clip = 1.0 + 10f64.powf(-BETA / 20.0);
    let mut total = 0.0f64;
    let mut count = 0usize;

    for end in SEGMENT_FRAMES..=num_frames {
        let start = end - SEGMENT_FRAMES;
        for (x_band, y_band) in x_env.iter().zip(&y_env) {
            let mut xs = x_band[start..end].to_vec();
            let ys = &y_band[start..end];

            let x_norm = xs.iter().map(|v| v * v).sum::<f64>().sqrt();
            let y_norm = ys.iter().map(|v| v * v).sum::<f64>().sqrt();
            let gain = x_norm / (y_norm + f64::EPSILON);

            let mut yp: Vec<f64> = ys
                .iter()
                .zip(&xs)
                .map(|(&yv, &xv)| (yv * gain).min(xv * clip))
                .collect();

            center_and_scale(&mut xs);
            center_and_scale(&mut yp);

            total += xs.iter().zip(&yp).map(|(a, b)| a * b).sum::<f64>();
            count += 1;
        }
    }

    let score = total / count as f64;
    if !score.is_finite() {
        return Err(MetricError::NonFinite("STOI"));
    }
    Ok(score)
}
