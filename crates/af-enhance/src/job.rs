//! Job registry shared between workers and pollers
//!
//! One `parking_lot::Mutex` guards the whole map. Records are created as
//! `processing`, move once to `completed` or `error`, and are never evicted.

use std::collections::HashMap;

use af_metrics::MetricsBundle;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Opaque job identifier (UUID v4)
pub type JobId = String;

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued or running
    Processing,
    /// Output written and scored
    Completed,
    /// Failed; see `error`
    Error,
    /// Unknown identifier (never stored)
    NotFound,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// Result of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Output reference, resolvable with `EnhancementService::fetch_output`
    pub output: String,
    /// Quality metrics of the enhanced signal
    pub metrics: MetricsBundle,
}

/// Point-in-time view of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    /// 0-100
    pub progress: u8,
    pub error: Option<String>,
    pub result: Option<JobOutput>,
}

impl JobSnapshot {
    fn processing(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::Processing,
            progress: 0,
            error: None,
            result: None,
        }
    }

    fn not_found(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::NotFound,
            progress: 0,
            error: None,
            result: None,
        }
    }
}

/// Thread-safe job registry
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<JobId, JobSnapshot>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh random identifier
    pub fn new_id() -> JobId {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register a job under a new identifier
    pub fn create(&self) -> JobId {
        let id = Self::new_id();
        self.submit(&id);
        id
    }

    /// Start tracking `job_id` at 0% processing; an existing record is kept
    pub fn submit(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(job_id) {
            log::warn!("Job {} already registered", job_id);
            return false;
        }
        jobs.insert(job_id.to_string(), JobSnapshot::processing(job_id));
        log::info!("Job {} submitted", job_id);
        true
    }

    /// Set progress (clamped to 0-100) of a job that is still processing.
    /// The last write wins, even when it is lower than the previous value.
    pub fn update_progress(&self, job_id: &str, percent: i32) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(job_id) {
            Some(record) if record.status == JobStatus::Processing => {
                record.progress = percent.clamp(0, 100) as u8;
                log::debug!("Job {} progress {}%", job_id, record.progress);
                true
            }
            _ => false,
        }
    }

    /// Terminal success transition; forces progress to 100
    pub fn complete(&self, job_id: &str, result: JobOutput) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(job_id) {
            Some(record) if record.status == JobStatus::Processing => {
                record.status = JobStatus::Completed;
                record.progress = 100;
                record.result = Some(result);
                log::info!("Job {} completed", job_id);
                true
            }
            Some(record) => {
                log::warn!("Job {} already {:?}, ignoring completion", job_id, record.status);
                false
            }
            None => false,
        }
    }

    /// Terminal failure transition; the message stays queryable forever
    pub fn fail(&self, job_id: &str, error: impl Into<String>) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(job_id) {
            Some(record) if record.status == JobStatus::Processing => {
                let error = error.into();
                log::info!("Job {} failed: {}", job_id, error);
                record.status = JobStatus::Error;
                record.error = Some(error);
                true
            }
            Some(record) => {
                log::warn!("Job {} already {:?}, ignoring failure", job_id, record.status);
                false
            }
            None => false,
        }
    }

    /// Current snapshot, or a `not_found` one
    pub fn get(&self, job_id: &str) -> JobSnapshot {
        self.jobs
            .lock()
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| JobSnapshot::not_found(job_id))
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}
