//! Application context: the submission, query, DLQ and pool-control surface.
//!
//! Adapters (HTTP, CLI) talk to the queue only through [`AppContext`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use queuectl_core::{DomainError, Job, JobId, JobState};

use crate::config::{Config, ConfigError};
use crate::jobs::{
    JobStore, JobStoreError, JsonFileJobStore, PoolError, PoolMonitor, PoolShutdown, WorkerPool,
};

pub const JOBS_FILE: &str = "jobs.json";
pub const CONFIG_FILE: &str = "config.json";

/// Error returned by every context operation.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(JobStoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<JobStoreError> for ServiceError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => Self::Domain(DomainError::not_found(id.as_str())),
            JobStoreError::AlreadyExists(id) => {
                Self::Domain(DomainError::already_exists(id.as_str()))
            }
            JobStoreError::Rejected(e) => Self::Domain(e),
            other => Self::Store(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Submission request. Unset fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            ..Self::default()
        }
    }
}

/// Per-state job counts plus live worker count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
    pub total: usize,
    pub active_workers: usize,
}

impl QueueStatus {
    pub fn count(&self, state: JobState) -> usize {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }
}

/// Execution-time statistics over jobs with a recorded `execution_time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionMetrics {
    pub measured: usize,
    /// Fraction of measured jobs that completed
    pub success_rate: f64,
    pub average: Option<f64>,
    pub total: f64,
    pub fastest: Option<f64>,
    pub slowest: Option<f64>,
}

impl ExecutionMetrics {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut metrics = Self::default();
        let mut completed = 0usize;

        for job in jobs {
            let Some(elapsed) = job.execution_time else {
                continue;
            };
            metrics.measured += 1;
            metrics.total += elapsed;
            if job.state == JobState::Completed {
                completed += 1;
            }
            metrics.fastest = Some(metrics.fastest.map_or(elapsed, |f| f.min(elapsed)));
            metrics.slowest = Some(metrics.slowest.map_or(elapsed, |s| s.max(elapsed)));
        }

        if metrics.measured > 0 {
            let n = metrics.measured as f64;
            metrics.average = Some(metrics.total / n);
            metrics.success_rate = completed as f64 / n;
        }
        metrics
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub active_count: usize,
    pub total_workers: usize,
}

/// Shared application state: the store, live configuration and the pool.
///
/// Pool control is serialized through a mutex; status reads use the pool's
/// monitor and never wait on a draining stop.
pub struct AppContext {
    store: Arc<dyn JobStore>,
    config: Arc<Config>,
    pool: Mutex<WorkerPool>,
    monitor: PoolMonitor,
}

impl AppContext {
    /// Open the store and configuration files inside `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> ServiceResult<Self> {
        let dir = data_dir.as_ref();
        let store = JsonFileJobStore::arc(dir.join(JOBS_FILE))?;
        let config = Arc::new(Config::load(dir.join(CONFIG_FILE)));
        info!(data_dir = %dir.display(), "queue context opened");
        Ok(Self::new(store, config))
    }

    pub fn new(store: Arc<dyn JobStore>, config: Arc<Config>) -> Self {
        let pool = WorkerPool::new(store.clone(), config.clone());
        Self::with_pool(store, config, pool)
    }

    /// Use a pre-configured pool (e.g. a shorter grace period).
    pub fn with_pool(store: Arc<dyn JobStore>, config: Arc<Config>, pool: WorkerPool) -> Self {
        Self {
            store,
            config,
            monitor: pool.monitor(),
            pool: Mutex::new(pool),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Create a `Pending` job. Fails on a blank id/command or a duplicate id.
    pub fn enqueue(&self, req: EnqueueRequest) -> ServiceResult<Job> {
        let id = JobId::parse(req.id)?;
        let max_retries = req
            .max_retries
            .unwrap_or_else(|| self.config.settings().max_retries);

        let mut job = Job::new(id, req.command)?.with_max_retries(max_retries);
        if let Some(priority) = req.priority {
            job = job.with_priority(priority);
        }
        if let Some(run_at) = req.run_at {
            job = job.with_run_at(run_at);
        }

        self.store.insert(&job)?;
        info!(job_id = %job.id, priority = job.priority, max_retries, "job enqueued");
        Ok(job)
    }

    pub fn get(&self, id: &str) -> ServiceResult<Job> {
        let id = JobId::parse(id)?;
        self.store
            .get(&id)?
            .ok_or_else(|| DomainError::not_found(id.as_str()).into())
    }

    pub fn list(&self, state: Option<JobState>) -> ServiceResult<Vec<Job>> {
        Ok(self.store.list(state)?)
    }

    pub fn dead_letters(&self) -> ServiceResult<Vec<Job>> {
        self.list(Some(JobState::Dead))
    }

    /// Move a `Dead` job back to `Pending` with a fresh retry budget.
    pub fn requeue_dead(&self, id: &str) -> ServiceResult<Job> {
        let id = JobId::parse(id)?;
        let now = Utc::now();
        let job = self.store.update(&id, &mut |job: &mut Job| job.requeue(now))?;
        info!(job_id = %job.id, "dead job requeued");
        Ok(job)
    }

    pub fn delete(&self, id: &str) -> ServiceResult<bool> {
        let id = JobId::parse(id)?;
        let existed = self.store.delete(&id)?;
        if existed {
            info!(job_id = %id, "job deleted");
        }
        Ok(existed)
    }

    pub fn status(&self) -> ServiceResult<QueueStatus> {
        let jobs = self.store.list(None)?;
        let mut status = QueueStatus {
            total: jobs.len(),
            active_workers: self.monitor.active_count(),
            ..QueueStatus::default()
        };
        for job in &jobs {
            match job.state {
                JobState::Pending => status.pending += 1,
                JobState::Processing => status.processing += 1,
                JobState::Completed => status.completed += 1,
                JobState::Failed => status.failed += 1,
                JobState::Dead => status.dead += 1,
            }
        }
        Ok(status)
    }

    pub fn stats(&self) -> ServiceResult<ExecutionMetrics> {
        let jobs = self.store.list(None)?;
        Ok(ExecutionMetrics::from_jobs(&jobs))
    }

    pub fn start_workers(&self, count: usize) -> ServiceResult<WorkerStatus> {
        self.pool().start(count)?;
        Ok(self.worker_status())
    }

    /// Stop the pool; blocks until workers drain or the grace period ends.
    pub fn stop_workers(&self) -> ServiceResult<PoolShutdown> {
        Ok(self.pool().stop()?)
    }

    pub fn worker_status(&self) -> WorkerStatus {
        WorkerStatus {
            running: self.monitor.is_running(),
            active_count: self.monitor.active_count(),
            total_workers: self.monitor.worker_count(),
        }
    }

    fn pool(&self) -> MutexGuard<'_, WorkerPool> {
        // pool bookkeeping stays consistent across a panicking holder
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
