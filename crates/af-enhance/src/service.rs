//! Asynchronous enhancement service
//!
//! A fixed pool of named worker threads drains a bounded job queue. Each job
//! decodes its input, runs the [`Enhancer`], writes `enhanced_<job_id>.wav`
//! into the output directory and scores the result. Callers only ever see the
//! [`JobTracker`]: `submit` returns an id immediately and `poll` reports it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use af_dsp::NormalizationStats;
use af_metrics::QualityEvaluator;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::audio::AudioSource;
use crate::config::{ModelArtifacts, ServiceConfig};
use crate::error::{EnhanceError, EnhanceResult};
use crate::job::{JobId, JobOutput, JobSnapshot, JobTracker};
use crate::model::{FrameModel, OnnxFrameModel};
use crate::pipeline::Enhancer;
use crate::sink::OutputSink;

/// Progress reported once metrics are computed
const PROGRESS_SCORED: i32 = 95;

/// One enhancement job
#[derive(Debug, Clone)]
pub struct EnhanceRequest {
    /// Noisy audio
    pub input: AudioSource,
    /// Clean audio to score against; the noisy input is used when absent
    pub clean_reference: Option<AudioSource>,
}

impl EnhanceRequest {
    pub fn new(input: AudioSource) -> Self {
        Self {
            input,
            clean_reference: None,
        }
    }

    pub fn with_reference(mut self, reference: AudioSource) -> Self {
        self.clean_reference = Some(reference);
        self
    }
}

struct Task {
    job_id: JobId,
    request: EnhanceRequest,
}

/// Everything a worker needs, shared read-only
struct WorkerContext {
    enhancer: Enhancer,
    evaluator: QualityEvaluator,
    model: Arc<dyn FrameModel>,
    stats: NormalizationStats,
    tracker: Arc<JobTracker>,
    output_dir: PathBuf,
}

impl WorkerContext {
    fn run(&self, task: Task) {
        let Task { job_id, request } = task;
        log::info!("Job {} started ({})", job_id, request.input.describe());

        let outcome = catch_unwind(AssertUnwindSafe(|| self.process(&job_id, &request)));
        match outcome {
            Ok(Ok(output)) => {
                self.tracker.complete(&job_id, output);
            }
            Ok(Err(err)) => {
                log::error!("Job {} failed: {}", job_id, err);
                self.tracker.fail(&job_id, err.to_string());
            }
            Err(_) => {
                log::error!("Job {} panicked", job_id);
                self.tracker.fail(&job_id, "internal error: worker panicked");
            }
        }
    }

    fn process(&self, job_id: &str, request: &EnhanceRequest) -> EnhanceResult<JobOutput> {
        let sample_rate = self.enhancer.config().sample_rate;
        let noisy = request.input.decode(sample_rate)?;
        let reference = match &request.clean_reference {
            Some(source) => match source.decode(sample_rate) {
                Ok(samples) => Some(samples),
                Err(e) => {
                    log::warn!(
                        "Job {}: clean reference unusable, scoring against input: {}",
                        job_id,
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let file_name = output_file_name(job_id);
        let mut sink = OutputSink::new().to_path(self.output_dir.join(&file_name));
        let report = |pct: u8| {
            self.tracker.update_progress(job_id, pct as i32);
        };

        let enhanced = self.enhancer.enhance(
            &noisy,
            self.model.as_ref(),
            &self.stats,
            &mut sink,
            Some(&report),
        )?;

        let reference = reference.as_deref().unwrap_or(noisy.as_slice());
        let metrics = self
            .evaluator
            .evaluate(reference, &enhanced.samples, enhanced.sample_rate);
        self.tracker.update_progress(job_id, PROGRESS_SCORED);

        log::info!(
            "Job {} scored: pesq={:.2} stoi={:.3} snr={:.1} dB",
            job_id,
            metrics.pesq,
            metrics.stoi,
            metrics.snr
        );

        Ok(JobOutput {
            output: file_name,
            metrics,
        })
    }
}

fn worker_loop(tasks: Receiver<Task>, ctx: Arc<WorkerContext>) {
    for task in tasks.iter() {
        ctx.run(task);
    }
    log::debug!("{} exiting", thread::current().name().unwrap_or("worker"));
}

/// Name of the output file for a job
pub fn output_file_name(job_id: &str) -> String {
    format!("enhanced_{job_id}.wav")
}

/// Bounded worker pool in front of the enhancement pipeline
pub struct EnhancementService {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    tracker: Arc<JobTracker>,
    output_dir: PathBuf,
    queue_capacity: usize,
}

impl std::fmt::Debug for EnhancementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnhancementService")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl EnhancementService {
    /// Start the worker pool
    ///
    /// Model and statistics are loaded once by the caller and shared by every
    /// job. Fails on invalid configuration, degenerate statistics, or an
    /// output directory that cannot be created.
    pub fn new(
        config: ServiceConfig,
        model: Arc<dyn FrameModel>,
        stats: NormalizationStats,
        tracker: Arc<JobTracker>,
    ) -> EnhanceResult<Self> {
        config.validate()?;
        stats.validate()?;
        std::fs::create_dir_all(&config.output_dir)?;

        let ctx = Arc::new(WorkerContext {
            enhancer: Enhancer::new(config.enhance.clone())?,
            evaluator: QualityEvaluator::new(config.eval.clone()),
            model,
            stats,
            tracker: Arc::clone(&tracker),
            output_dir: config.output_dir.clone(),
        });

        let (sender, receiver) = bounded::<Task>(config.queue_capacity);

        let mut workers = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let rx = receiver.clone();
            let ctx = Arc::clone(&ctx);
            let handle = thread::Builder::new()
                .name(format!("af-worker-{i}"))
                .spawn(move || worker_loop(rx, ctx))?;
            workers.push(handle);
        }

        log::info!(
            "Enhancement service started: {} workers, queue {}, model {}, output {}",
            config.workers,
            config.queue_capacity,
            ctx.model.name(),
            config.output_dir.display()
        );

        Ok(Self {
            sender: Some(sender),
            workers,
            tracker,
            output_dir: config.output_dir,
            queue_capacity: config.queue_capacity,
        })
    }

    /// Load the ONNX model and statistics from disk, then start
    pub fn from_artifacts(
        config: ServiceConfig,
        artifacts: &ModelArtifacts,
        tracker: Arc<JobTracker>,
    ) -> EnhanceResult<Self> {
        let model = OnnxFrameModel::load(&artifacts.model_path)?;
        let stats = NormalizationStats::load(&artifacts.stats_path)?;
        Self::new(config, Arc::new(model), stats, tracker)
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Queue a job and return its id without waiting
    ///
    /// A saturated queue rejects the job; the id is still registered, in the
    /// `error` state, so a later poll explains what happened.
    pub fn submit(&self, request: EnhanceRequest) -> EnhanceResult<JobId> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| EnhanceError::Config("service is shut down".into()))?;

        let job_id = self.tracker.create();
        match sender.try_send(Task {
            job_id: job_id.clone(),
            request,
        }) {
            Ok(()) => Ok(job_id),
            Err(TrySendError::Full(_)) => {
                log::warn!("Job queue full, rejecting {}", job_id);
                self.tracker.fail(&job_id, "rejected: job queue full");
                Err(EnhanceError::Rejected {
                    capacity: self.queue_capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.tracker.fail(&job_id, "rejected: service is shut down");
                Err(EnhanceError::Config("service is shut down".into()))
            }
        }
    }

    /// Snapshot of a job; unknown ids report `not_found`
    pub fn poll(&self, job_id: &str) -> JobSnapshot {
        self.tracker.get(job_id)
    }

    /// Bytes of a completed job's output file
    ///
    /// Only bare file names inside the output directory resolve.
    pub fn fetch_output(&self, output: &str) -> EnhanceResult<Vec<u8>> {
        let mut components = Path::new(output).components();
        let is_bare_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(name)), None) if name == output
        );
        if !is_bare_name {
            return Err(EnhanceError::NotFound(output.to_string()));
        }

        match std::fs::read(self.output_dir.join(output)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EnhanceError::NotFound(output.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop accepting jobs, finish the queued ones and join the workers
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Worker thread panicked during shutdown");
            }
        }
        log::info!("Enhancement service stopped");
    }
}

impl Drop for EnhancementService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
