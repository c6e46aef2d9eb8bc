//! Cross-correlation time alignment of two signals

use num_complex::Complex64;
use realfft::RealFftPlanner;

/// Signed lag of `reference` relative to `test`
///
/// `delay = argmax(xcorr_full(reference, test)) - (len(test) - 1)`, clipped to
/// `±max_delay` (default: a quarter of the shorter signal). Correlation is
/// computed via zero-padded real FFTs.
pub fn estimate_delay(reference: &[f32], test: &[f32], max_delay: Option<usize>) -> isize {
    if reference.is_empty() || test.is_empty() {
        return 0;
    }
    let has_energy = |s: &[f32]| s.iter().any(|&x| x != 0.0);
    if !has_energy(reference) || !has_energy(test) {
        return 0;
    }

    let len_r = reference.len();
    let len_t = test.len();
    let full_len = len_r + len_t - 1;
    let n = full_len.next_power_of_two();

    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buf_r = forward.make_input_vec();
    let mut buf_t = forward.make_input_vec();
    for (dst, &src) in buf_r.iter_mut().zip(reference) {
        *dst = src as f64;
    }
    for (dst, &src) in buf_t.iter_mut().zip(test) {
        *dst = src as f64;
    }

    let mut spec_r = forward.make_output_vec();
    let mut spec_t = forward.make_output_vec();
    // Buffer lengths are produced by the plan itself
    if forward.process(&mut buf_r, &mut spec_r).is_err()
        || forward.process(&mut buf_t, &mut spec_t).is_err()
    {
        log::warn!("Cross-correlation FFT failed, assuming zero delay");
        return 0;
    }

    let mut cross: Vec<Complex64> = spec_r
        .iter()
        .zip(spec_t.iter())
        .map(|(r, t)| r * t.conj())
        .collect();
    cross[0].im = 0.0;
    if let Some(last) = cross.last_mut() {
        last.im = 0.0;
    }

    let mut circular = inverse.make_output_vec();
    if inverse.process(&mut cross, &mut circular).is_err() {
        log::warn!("Cross-correlation inverse FFT failed, assuming zero delay");
        return 0;
    }

    // Walk the full correlation in numpy order: lag -(len_t - 1) ..= len_r - 1
    let mut best_lag = 0isize;
    let mut best = f64::NEG_INFINITY;
    for k in 0..full_len {
        let lag = k as isize - (len_t as isize - 1);
        let idx = if lag >= 0 {
            lag as usize
        } else {
            (n as isize + lag) as usize
        };
        if circular[idx] > best {
            best = circular[idx];
            best_lag = lag;
        }
    }

    let limit = max_delay.unwrap_or(len_r.min(len_t) / 4) as isize;
    best_lag.clamp(-limit, limit)
}

/// Align `test` to `reference`, returning equally long trimmed copies
///
/// A positive delay drops the head of `reference` and the tail of `test`;
/// a negative delay does the mirror. Both outputs are then cut to the
/// shorter length.
pub fn align(reference: &[f32], test: &[f32], max_delay: Option<usize>) -> (Vec<f32>, Vec<f32>) {
    let delay = estimate_delay(reference, test, max_delay);
    log::debug!("Estimated alignment delay: {} samples", delay);

    let (r, t): (&[f32], &[f32]) = if delay > 0 {
        let d = delay as usize;
        (
            &reference[d.min(reference.len())..],
            &test[..test.len().saturating_sub(d)],
        )
    } else if delay < 0 {
        let d = delay.unsigned_abs();
        (
            &reference[..reference.len().saturating_sub(d)],
            &test[d.min(test.len())..],
        )
    } else {
        (reference, test)
    };

    let len = r.len().min(t.len());
    (r[..len].to_vec(), t[..len].to_vec())
}
