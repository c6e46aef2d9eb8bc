//! Offline sample rate conversion (windowed-sinc, rubato)

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{DspError, DspResult};

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Resample a mono signal from `from_rate` to `to_rate`
///
/// The filter delay is compensated, so the output is time-aligned with the
/// input and has exactly `round(len * to_rate / from_rate)` samples.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> DspResult<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(DspError::InvalidConfig(format!(
            "sample rates must be non-zero ({from_rate} -> {to_rate})"
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let target_len = (samples.len() as f64 * ratio).round() as usize;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, sinc_params(), samples.len(), 1)
        .map_err(|e| DspError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();

    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| DspError::Resample(e.to_string()))?
        .into_iter()
        .next()
        .unwrap_or_default();

    // Flush the samples still held back by the filter delay
    let tail = resampler
        .process_partial(None::<&[Vec<f32>]>, None)
        .map_err(|e| DspError::Resample(e.to_string()))?
        .into_iter()
        .next()
        .unwrap_or_default();
    output.extend_from_slice(&tail);

    let mut output = output.split_off(delay.min(output.len()));
    output.resize(target_len, 0.0);

    log::trace!(
        "Resampled {} samples {} Hz -> {} samples {} Hz",
        samples.len(),
        from_rate,
        output.len(),
        to_rate
    );

    Ok(output)
}
