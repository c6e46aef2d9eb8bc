//! Perceptual speech quality score in the style of ITU-T P.862 (wideband)
//!
//! Both signals are level-aligned, mapped to Bark-band loudness (Zwicker
//! power law) frame by frame and compared. Per-frame symmetric and asymmetric
//! disturbances are aggregated with an L6 norm over ~320 ms chunks and an L2
//! norm over time, combined into a raw score and mapped to MOS-LQO with the
//! P.862.2 logistic curve.
//!
//! Scoring always runs in wideband mode at 16 kHz; every other rate,
//! narrowband 8 kHz included, is resampled first.
//!
//! ## Calibration
//!
//! Only the end points are pinned to P.862.2: identical inputs score
//! `raw_to_mos(4.5)` = 4.6439 (what reference wideband PESQ reports for a
//! file compared with itself), and a muted or fully masked test signal scores
//! `raw_to_mos(-0.5)` ≈ 1.04. Between them the score decreases monotonically
//! with added noise but is not fitted to the ITU conformance set, so values
//! are comparable between runs of this crate, not with other PESQ tools.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{MetricError, MetricResult};
use crate::stats::peak_normalize;

/// Wideband scoring rate; other rates are resampled to it
pub const SCORING_RATE: u32 = 16_000;

/// 32 ms analysis frames at the scoring rate
const FRAME_LEN: usize = 512;

/// Mean frame power both signals are aligned to
const TARGET_FRAME_POWER: f64 = 1e7;

/// Per-band absolute threshold in aligned power units
const HEARING_THRESHOLD: f64 = 1e2;

/// Zwicker loudness exponent
const ZWICKER_POWER: f64 = 0.23;

/// Width of one perceptual band (Bark)
const BARK_STEP: f64 = 0.5;

/// Lowest analysed frequency (Hz)
const MIN_FREQ_HZ: f64 = 100.0;

/// Frames per aggregation chunk (20 x 16 ms hop = 320 ms)
const CHUNK_FRAMES: usize = 20;

/// Frames quieter than this relative to the loudest are not scored
const SILENCE_RANGE_DB: f64 = 40.0;

const SYM_WEIGHT: f64 = 0.1;
const ASYM_WEIGHT: f64 = 0.0309;
const RAW_RANGE: (f64, f64) = (-0.5, 4.5);

/// Weight of removed energy relative to added energy in the asymmetry factor
const MISSING_ENERGY_WEIGHT: f64 = 0.5;

/// Asymmetry factors below this are ignored, above the cap they saturate
const ASYM_FLOOR: f64 = 3.0;
const ASYM_CAP: f64 = 12.0;

fn hz_to_bark(freq: f64) -> f64 {
    13.0 * (0.00076 * freq).atan() + 3.5 * (freq / 7500.0).powi(2).atan()
}

/// Zwicker loudness of a band with aligned power `power`
fn loudness(power: f64) -> f64 {
    let p0 = HEARING_THRESHOLD;
    let l = (p0 / 0.5).powf(ZWICKER_POWER)
        * ((0.5 + 0.5 * power / p0).powf(ZWICKER_POWER) - 1.0);
    l.max(0.0)
}

/// Asymmetry factor of one band
///
/// Added energy (noise, artefacts) counts fully; removed energy (muted or
/// over-suppressed bands) counts at `MISSING_ENERGY_WEIGHT`.
fn asymmetry(pr: f64, pt: f64) -> f64 {
    let ratio = (pt + 50.0) / (pr + 50.0);
    let added = ratio.powf(1.2);
    let missing = MISSING_ENERGY_WEIGHT * ratio.recip().powf(1.2);
    let factor = added.max(missing);
    if factor < ASYM_FLOOR {
        0.0
    } else {
        factor.min(ASYM_CAP)
    }
}

/// P.862.2 raw-to-MOS-LQO mapping
pub fn raw_to_mos(raw: f64) -> f64 {
    0.999 + 4.0 / (1.0 + (-1.3669 * raw + 3.8224).exp())
}

fn lp_mean(values: &[f64], p: i32) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values.iter().map(|v| v.abs().powi(p)).sum();
    (sum / values.len() as f64).powf(1.0 / p as f64)
}

/// Frame-wise Bark-band power analysis at the scoring rate
struct BarkAnalyzer {
    frame_len: usize,
    hop: usize,
    window: Vec<f64>,
    fft: Arc<dyn RealToComplex<f64>>,
    band_of_bin: Vec<Option<usize>>,
    num_bands: usize,
}

impl BarkAnalyzer {
    fn new() -> Self {
        let sample_rate = SCORING_RATE;
        let frame_len = FRAME_LEN;
        let hop = frame_len / 2;
        let window = (0..frame_len)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / frame_len as f64).cos())
            })
            .collect();

        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(frame_len);

        let max_freq = sample_rate as f64 * 0.4375;
        let z_min = hz_to_bark(MIN_FREQ_HZ);
        let mut num_bands = 0;
        let band_of_bin = (0..=frame_len / 2)
            .map(|bin| {
                let freq = bin as f64 * sample_rate as f64 / frame_len as f64;
                if !(MIN_FREQ_HZ..=max_freq).contains(&freq) {
                    return None;
                }
                let band = ((hz_to_bark(freq) - z_min) / BARK_STEP) as usize;
                num_bands = num_bands.max(band + 1);
                Some(band)
            })
            .collect();

        Self {
            frame_len,
            hop,
            window,
            fft,
            band_of_bin,
            num_bands,
        }
    }

    /// frames x bands power matrix
    fn band_powers(&self, signal: &[f32]) -> MetricResult<Vec<Vec<f64>>> {
        let mut input = self.fft.make_input_vec();
        let mut output = self.fft.make_output_vec();
        let mut frames = Vec::new();

        let mut start = 0;
        while start + self.frame_len <= signal.len() {
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = signal[start + i] as f64 * self.window[i];
            }
            self.fft
                .process(&mut input, &mut output)
                .map_err(|e| MetricError::Degenerate(format!("FFT failed: {e}")))?;

            let mut bands = vec![0.0f64; self.num_bands];
            for (bin, band) in self.band_of_bin.iter().enumerate() {
                if let Some(b) = band {
                    bands[*b] += output[bin].norm_sqr();
                }
            }
            frames.push(bands);
            start += self.hop;
        }

        Ok(frames)
    }
}

/// Scale every frame so the mean frame power equals the target level
fn level_align(frames: &mut [Vec<f64>]) -> Option<f64> {
    let total: f64 = frames.iter().map(|f| f.iter().sum::<f64>()).sum();
    let mean = total / frames.len().max(1) as f64;
    if !(mean > f64::MIN_POSITIVE) {
        return None;
    }
    let gain = TARGET_FRAME_POWER / mean;
    for frame in frames.iter_mut() {
        for p in frame.iter_mut() {
            *p *= gain;
        }
    }
    Some(gain)
}

/// Score `test` against `reference` at `sample_rate`
///
/// Signals shorter than `min_seconds` (after any resampling) are rejected
/// with [`MetricError::TooShort`].
pub fn pesq(
    reference: &[f32],
    test: &[f32],
    sample_rate: u32,
    min_seconds: f64,
) -> MetricResult<f64> {
    if reference.is_empty() || test.is_empty() {
        return Err(MetricError::InvalidSignal("empty signal".into()));
    }
    if sample_rate == 0 {
        return Err(MetricError::InvalidSignal("sample rate must be positive".into()));
    }

    let rate = SCORING_RATE;
    let (reference, test) = if sample_rate == rate {
        (reference.to_vec(), test.to_vec())
    } else {
        log::debug!("PESQ: resampling {} Hz -> {} Hz", sample_rate, rate);
        (
            af_dsp::resample(reference, sample_rate, rate)?,
            af_dsp::resample(test, sample_rate, rate)?,
        )
    };

    let len = reference.len().min(test.len());
    let needed = (min_seconds * rate as f64).ceil() as usize;
    if len < needed {
        return Err(MetricError::TooShort { needed, got: len });
    }

    let reference = peak_normalize(&reference[..len])?;
    let test = peak_normalize(&test[..len])?;

    let analyzer = BarkAnalyzer::new();
    let mut ref_frames = analyzer.band_powers(&reference)?;
    let mut test_frames = analyzer.band_powers(&test)?;

    if level_align(&mut ref_frames).is_none() {
        return Err(MetricError::Degenerate("silent reference".into()));
    }
    if level_align(&mut test_frames).is_none() {
        log::debug!("PESQ: silent test signal, scoring at the floor");
        return Ok(raw_to_mos(RAW_RANGE.0));
    }

    let frame_power: Vec<f64> = ref_frames.iter().map(|f| f.iter().sum()).collect();
    let loudest = frame_power.iter().copied().fold(0.0f64, f64::max);
    let threshold = loudest * 10f64.powf(-SILENCE_RANGE_DB / 10.0);

    let mut sym = Vec::new();
    let mut asym = Vec::new();

    for (idx, (r, t)) in ref_frames.iter().zip(test_frames.iter()).enumerate() {
        if frame_power[idx] <= threshold {
            continue;
        }

        let mut sum_sq = 0.0f64;
        let mut sum_asym = 0.0f64;

        for (&pr, &pt) in r.iter().zip(t.iter()) {
            let lr = loudness(pr);
            let lt = loudness(pt);

            let masked = ((lt - lr).abs() - 0.25 * lr.min(lt)).max(0.0);

            let factor = asymmetry(pr, pt);

            sum_sq += masked * masked;
            sum_asym += masked * factor;
        }

        let bands = r.len().max(1) as f64;
        sym.push((sum_sq / bands).sqrt());
        asym.push(sum_asym / bands);
    }

    if sym.is_empty() {
        return Err(MetricError::Degenerate("no active speech frames".into()));
    }

    let aggregate = |per_frame: &[f64]| -> f64 {
        let chunks: Vec<f64> = per_frame
            .chunks(CHUNK_FRAMES)
            .map(|c| lp_mean(c, 6))
            .collect();
        lp_mean(&chunks, 2)
    };

    let d_sym = aggregate(&sym);
    let d_asym = aggregate(&asym);

    let raw = (4.5 - SYM_WEIGHT * d_sym - ASYM_WEIGHT * d_asym).clamp(RAW_RANGE.0, RAW_RANGE.1);
    let mos = raw_to_mos(raw);

    log::trace!(
        "PESQ: d_sym={:.3}, d_asym={:.3}, raw={:.3}, mos={:.3}",
        d_sym,
        d_asym,
        raw,
        mos
    );

    if !mos.is_finite() {
        return Err(MetricError::NonFinite("PESQ"));
    }
    Ok(mos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech_like(len: usize, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / rate as f32;
                let envelope = 0.6 + 0.4 * (2.0 * std::f32::consts::PI * 4.0 * t).sin();
                let voiced: f32 = [220.0f32, 440.0, 660.0, 1320.0]
                    .iter()
                    .enumerate()
                    .map(|(k, f)| (2.0 * std::f32::consts::PI * f * t).sin() / (k + 1) as f32)
                    .sum();
                0.3 * envelope * voiced
            })
            .collect()
    }

    fn noise(len: usize, amplitude: f32) -> Vec<f32> {
        let mut state = 0x2545_f491u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                amplitude * (state as f32 / u32::MAX as f32 * 2.0 - 1.0)
            })
            .collect()
    }

    fn add(a: &[f32], b: &[f32]) -> Vec<f32> {
        a.iter().zip(b).map(|(x, y)| x + y).collect()
    }

    #[test]
    fn test_identical_reaches_ceiling() {
        let clean = speech_like(16000, 16000);
        let score = pesq(&clean, &clean, 16000, 0.25).unwrap();
        assert!((score - raw_to_mos(4.5)).abs() < 1e-9);
        // Wideband PESQ of a file against itself
        assert!((score - 4.6439).abs() < 1e-3);
    }

    #[test]
    fn test_silent_output_scores_at_floor() {
        let clean = speech_like(16000, 16000);
        let muted = vec![0.0f32; 16000];
        let score = pesq(&clean, &muted, 16000, 0.25).unwrap();
        assert!((score - raw_to_mos(-0.5)).abs() < 1e-9);
        assert!(score < 1.05);
    }

    #[test]
    fn test_removed_band_counts_as_disturbance() {
        let rate = 16000.0f32;
        let low: Vec<f32> = (0..16000)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 300.0 * i as f32 / rate).sin())
            .collect();
        let high: Vec<f32> = (0..16000)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 3000.0 * i as f32 / rate).sin())
            .collect();
        let both = add(&low, &high);

        let full = pesq(&both, &both, 16000, 0.25).unwrap();
        let missing_high = pesq(&both, &low, 16000, 0.25).unwrap();
        assert!(missing_high < full - 0.1, "{missing_high} vs {full}");
    }

    #[test]
    fn test_asymmetry_factor() {
        // Equal and mildly different bands are not asymmetric
        assert_eq!(asymmetry(1e5, 1e5), 0.0);
        assert_eq!(asymmetry(1e5, 1.5e5), 0.0);
        // Added energy saturates at the cap
        assert_eq!(asymmetry(0.0, 1e6), ASYM_CAP);
        // Removed energy counts too, at a reduced weight
        assert_eq!(asymmetry(1e6, 0.0), ASYM_CAP);
        let removed = asymmetry(1e3, 50.0);
        let added = asymmetry(50.0, 1e3);
        assert!(removed > 0.0 && removed < added, "{removed} vs {added}");
    }

    #[test]
    fn test_score_decreases_with_noise_level() {
        let clean = speech_like(16000, 16000);
        let scores: Vec<f64> = [0.003f32, 0.01, 0.03, 0.1, 0.3]
            .iter()
            .map(|&amp| pesq(&clean, &add(&clean, &noise(16000, amp)), 16000, 0.25).unwrap())
            .collect();

        for pair in scores.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9, "{scores:?}");
        }
        assert!(scores[0] - scores[4] > 1.0, "{scores:?}");
    }

    #[test]
    fn test_noise_lowers_score() {
        let clean = speech_like(16000, 16000);
        let light = add(&clean, &noise(16000, 0.01));
        let heavy = add(&clean, &noise(16000, 0.3));

        let ceiling = pesq(&clean, &clean, 16000, 0.25).unwrap();
        let light_score = pesq(&clean, &light, 16000, 0.25).unwrap();
        let heavy_score = pesq(&clean, &heavy, 16000, 0.25).unwrap();

        assert!(light_score <= ceiling);
        assert!(heavy_score < light_score, "{heavy_score} vs {light_score}");
        assert!(heavy_score >= raw_to_mos(-0.5));
    }

    #[test]
    fn test_short_signal_rejected() {
        let clean = speech_like(3000, 16000);
        assert!(matches!(
            pesq(&clean, &clean, 16000, 0.25),
            Err(MetricError::TooShort { needed: 4000, got: 3000 })
        ));
    }

    #[test]
    fn test_non_native_rate_is_resampled() {
        let clean = speech_like(22050, 22050);
        let score = pesq(&clean, &clean, 22050, 0.25).unwrap();
        assert!((score - 4.64).abs() < 0.01);
    }

    #[test]
    fn test_narrowband_input_scored_as_wideband() {
        let clean = speech_like(8000, 8000);
        let noisy = add(&clean, &noise(8000, 0.3));

        let ceiling = pesq(&clean, &clean, 8000, 0.25).unwrap();
        assert!((ceiling - raw_to_mos(4.5)).abs() < 1e-9);
        assert!(pesq(&clean, &noisy, 8000, 0.25).unwrap() < ceiling);
    }

    #[test]
    fn test_silent_reference_is_degenerate() {
        let silence = vec![0.0f32; 16000];
        assert!(pesq(&silence, &speech_like(16000, 16000), 16000, 0.25).is_err());
    }

    #[test]
    fn test_mos_mapping_range() {
        let floor = raw_to_mos(-0.5);
        assert!(floor > 1.0 && floor < 1.05);
        assert!(raw_to_mos(4.5) > 4.6);
    }
}
