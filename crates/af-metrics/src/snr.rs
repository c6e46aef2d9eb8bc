//! Segmental and global signal-to-noise ratio

use crate::error::{MetricError, MetricResult};

/// Frames (or whole signals) with power below this are ignored
pub const POWER_FLOOR: f64 = 1e-10;

/// Per-frame SNR clamp (dB)
pub const SEG_SNR_RANGE: (f64, f64) = (-10.0, 35.0);

/// Reported when the residual is negligible
pub const SNR_CEILING_DB: f64 = 60.0;

fn mean_power(samples: impl Iterator<Item = f64>, len: usize) -> f64 {
    samples.map(|s| s * s).sum::<f64>() / len as f64
}

/// Mean of clamped per-frame SNRs over overlapping frames
///
/// Frames start every `hop` samples while `start + frame_len < len`; frames
/// whose signal or noise power is below [`POWER_FLOOR`] are dropped. Returns
/// 0.0 when no frame qualifies.
pub fn segmental_snr(
    reference: &[f32],
    test: &[f32],
    frame_len: usize,
    hop: usize,
) -> MetricResult<f64> {
    if frame_len == 0 || hop == 0 {
        return Err(MetricError::InvalidSignal(format!(
            "frame length {frame_len} / hop {hop} must be non-zero"
        )));
    }

    let len = reference.len().min(test.len());
    let mut total = 0.0f64;
    let mut kept = 0usize;

    let mut start = 0usize;
    while start + frame_len < len {
        let r = &reference[start..start + frame_len];
        let t = &test[start..start + frame_len];

        let signal = mean_power(r.iter().map(|&s| s as f64), frame_len);
        let noise = mean_power(
            r.iter().zip(t).map(|(&a, &b)| a as f64 - b as f64),
            frame_len,
        );

        if signal >= POWER_FLOOR && noise >= POWER_FLOOR {
            let snr = 10.0 * (signal / noise).log10();
            total += snr.clamp(SEG_SNR_RANGE.0, SEG_SNR_RANGE.1);
            kept += 1;
        }

        start += hop;
    }

    let value = if kept == 0 { 0.0 } else { total / kept as f64 };
    if !value.is_finite() {
        return Err(MetricError::NonFinite("segmental SNR"));
    }
    Ok(value)
}

/// Whole-signal SNR, capped at [`SNR_CEILING_DB`] for a negligible residual
pub fn global_snr(reference: &[f32], test: &[f32]) -> MetricResult<f64> {
    let len = reference.len().min(test.len());
    if len == 0 {
        return Err(MetricError::InvalidSignal("empty signal".into()));
    }

    let signal = mean_power(reference[..len].iter().map(|&s| s as f64), len);
    let noise = mean_power(
        reference[..len]
            .iter()
            .zip(&test[..len])
            .map(|(&a, &b)| a as f64 - b as f64),
        len,
    );

    if !signal.is_finite() || !noise.is_finite() {
        return Err(MetricError::NonFinite("global SNR"));
    }
    if noise < POWER_FLOOR {
        return Ok(SNR_CEILING_DB);
    }
    if signal < POWER_FLOOR {
        return Err(MetricError::Degenerate("silent reference".into()));
    }

    Ok(10.0 * (signal / (noise + POWER_FLOOR)).log10())
}
