//! End-to-end tests for af-enhance
//!
//! - Synthetic noisy speech through the full pipeline
//! - Job lifecycle through the worker service
//! - Output reference resolution

use std::sync::Arc;
use std::time::{Duration, Instant};

use af_enhance::{
    AudioSource, EnhanceConfig, EnhanceError, EnhanceRequest, EnhancementService, Enhancer,
    IdentityModel, JobSnapshot, JobStatus, JobTracker, NormalizationStats, OutputSink,
    QualityEvaluator, ServiceConfig, encode_wav,
};
use approx::assert_relative_eq;

const RATE: u32 = 16_000;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 100-300 Hz linear chirp, one second
fn clean_chirp() -> Vec<f32> {
    let duration = 1.0f32;
    (0..RATE as usize)
        .map(|i| {
            let t = i as f32 / RATE as f32;
            let phase = 2.0 * std::f32::consts::PI * (100.0 * t + 100.0 * t * t / duration);
            0.5 * phase.sin()
        })
        .collect()
}

/// Uniform white noise in [-amplitude, amplitude] from a fixed LCG
fn white_noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
            (unit * 2.0 - 1.0) * amplitude
        })
        .collect()
}

fn noisy_chirp() -> (Vec<f32>, Vec<f32>) {
    let clean = clean_chirp();
    let noise = white_noise(clean.len(), 0.15, 7);
    let noisy = clean.iter().zip(&noise).map(|(c, n)| c + n).collect();
    (clean, noisy)
}

fn stats() -> NormalizationStats {
    NormalizationStats::new(-25.0, 18.0).unwrap()
}

fn wait_terminal(service: &EnhancementService, id: &str) -> (JobSnapshot, Vec<u8>) {
    let deadline = Instant::now() + Duration::from_secs(120);
    let mut seen = Vec::new();
    loop {
        let snap = service.poll(id);
        seen.push(snap.progress);
        if snap.status.is_terminal() {
            return (snap, seen);
        }
        assert!(Instant::now() < deadline, "job {id} did not finish");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_post_filter_improves_snr_over_noisy_input() {
    init_logger();
    let (clean, noisy) = noisy_chirp();

    let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
    let mut sink = OutputSink::new().to_buffer();
    let enhanced = enhancer
        .enhance(&noisy, &IdentityModel, &stats(), &mut sink, None)
        .unwrap();

    assert_eq!(enhanced.samples.len(), noisy.len());
    assert_eq!(enhanced.sample_rate, RATE);
    assert_relative_eq!(enhanced.duration_secs(), 1.0, epsilon = 1e-9);

    let evaluator = QualityEvaluator::default();
    let before = evaluator.evaluate(&clean, &noisy, RATE);
    let after = evaluator.evaluate(&clean, &enhanced.samples, RATE);

    assert!(before.degraded.is_empty(), "{:?}", before.degraded);
    assert!(after.degraded.is_empty(), "{:?}", after.degraded);
    assert!(
        after.snr > before.snr,
        "snr before {:.2} dB, after {:.2} dB",
        before.snr,
        after.snr
    );
}

#[test]
fn test_post_filter_improves_snr_of_noisy_sine() {
    init_logger();
    let clean: Vec<f32> = (0..RATE as usize)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / RATE as f32).sin())
        .collect();
    let noise = white_noise(clean.len(), 0.15, 11);
    let noisy: Vec<f32> = clean.iter().zip(&noise).map(|(c, n)| c + n).collect();

    let enhancer = Enhancer::new(EnhanceConfig::default()).unwrap();
    let mut sink = OutputSink::new().to_buffer();
    let enhanced = enhancer
        .enhance(&noisy, &IdentityModel, &stats(), &mut sink, None)
        .unwrap();
    assert_eq!(enhanced.samples.len(), clean.len());

    let evaluator = QualityEvaluator::default();
    let before = evaluator.evaluate(&clean, &noisy, RATE);
    let after = evaluator.evaluate(&clean, &enhanced.samples, RATE);

    assert!(
        after.snr >= before.snr,
        "snr before {:.2} dB, after {:.2} dB",
        before.snr,
        after.snr
    );
}

#[test]
fn test_written_wav_matches_returned_samples() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("enhanced.wav");
    let (_, noisy) = noisy_chirp();

    let enhancer = Enhancer::new(EnhanceConfig::default().with_bit_depth(32)).unwrap();
    let mut sink = OutputSink::new().to_path(&path).to_buffer();
    let enhanced = enhancer
        .enhance(&noisy, &IdentityModel, &stats(), &mut sink, None)
        .unwrap();

    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(sink.buffer(), Some(on_disk.as_slice()));

    let decoded = AudioSource::Path(path).decode(RATE).unwrap();
    assert_eq!(decoded.len(), enhanced.samples.len());
    for (a, b) in decoded.iter().zip(&enhanced.samples) {
        assert_eq!(a, &b.clamp(-1.0, 1.0));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_service_job_with_clean_reference() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let (clean, noisy) = noisy_chirp();

    let noisy_path = dir.path().join("noisy.wav");
    let clean_path = dir.path().join("clean.wav");
    std::fs::write(&noisy_path, encode_wav(&noisy, RATE, 16).unwrap()).unwrap();
    std::fs::write(&clean_path, encode_wav(&clean, RATE, 16).unwrap()).unwrap();

    let tracker = Arc::new(JobTracker::new());
    let service = EnhancementService::new(
        ServiceConfig::default().with_output_dir(dir.path().join("output")),
        Arc::new(IdentityModel),
        stats(),
        Arc::clone(&tracker),
    )
    .unwrap();

    let request = EnhanceRequest::new(AudioSource::Path(noisy_path))
        .with_reference(AudioSource::Path(clean_path));
    let id = service.submit(request).unwrap();

    let (snap, seen) = wait_terminal(&service, &id);
    assert_eq!(snap.status, JobStatus::Completed, "error: {:?}", snap.error);
    assert_eq!(snap.progress, 100);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");

    let result = snap.result.unwrap();
    let metrics = &result.metrics;
    assert!(metrics.degraded.is_empty(), "{:?}", metrics.degraded);
    assert!(metrics.pesq >= 1.0 && metrics.pesq <= 4.65);
    assert!(metrics.stoi > 0.0 && metrics.stoi <= 1.0);
    assert!(metrics.snr > 5.0);

    let bytes = service.fetch_output(&result.output).unwrap();
    let decoded = AudioSource::Bytes(bytes).decode(RATE).unwrap();
    assert_eq!(decoded.len(), clean.len());

    // The tracker outlives the job and is shared with the caller
    assert_eq!(tracker.get(&id), service.poll(&id));
}

#[test]
fn test_concurrent_jobs_all_finish() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let (_, noisy) = noisy_chirp();
    let wav = encode_wav(&noisy[..8000], RATE, 16).unwrap();

    let service = EnhancementService::new(
        ServiceConfig::default()
            .with_output_dir(dir.path())
            .with_workers(3),
        Arc::new(IdentityModel),
        stats(),
        Arc::new(JobTracker::new()),
    )
    .unwrap();

    let ids: Vec<_> = (0..6)
        .map(|_| {
            service
                .submit(EnhanceRequest::new(AudioSource::Bytes(wav.clone())))
                .unwrap()
        })
        .collect();

    for id in &ids {
        let (snap, _) = wait_terminal(&service, id);
        assert_eq!(snap.status, JobStatus::Completed, "error: {:?}", snap.error);
        assert!(dir.path().join(format!("enhanced_{id}.wav")).is_file());
    }
}

#[test]
fn test_poll_unknown_job() {
    let dir = tempfile::tempdir().unwrap();
    let service = EnhancementService::new(
        ServiceConfig::default().with_output_dir(dir.path()),
        Arc::new(IdentityModel),
        stats(),
        Arc::new(JobTracker::new()),
    )
    .unwrap();

    let snap = service.poll("00000000-0000-0000-0000-000000000000");
    assert_eq!(snap.status, JobStatus::NotFound);
    assert!(snap.result.is_none());

    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["status"], "not_found");
}

#[test]
fn test_fetch_output_outside_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("secret.wav"), b"RIFF").unwrap();
    let service = EnhancementService::new(
        ServiceConfig::default().with_output_dir(dir.path().join("output")),
        Arc::new(IdentityModel),
        stats(),
        Arc::new(JobTracker::new()),
    )
    .unwrap();

    let escape = format!("..{}secret.wav", std::path::MAIN_SEPARATOR);
    assert!(matches!(
        service.fetch_output(&escape),
        Err(EnhanceError::NotFound(_))
    ));
}
