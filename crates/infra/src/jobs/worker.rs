//! Worker loop: select, claim, execute, record.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use queuectl_core::{AttemptOutput, FailureOutcome, Job, JobId, JobState};

use super::executor::{CommandExecutor, Execute, ExecutionErrorKind, ExecutionFailure};
use super::store::{ClaimOutcome, JobStore, JobStoreError};
use crate::config::{Config, QueueSettings};

/// Handle to control and join a running worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    shutdown: mpsc::Sender<()>,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    current_job: Arc<Mutex<Option<JobId>>>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the worker loop is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Liveness flag shared with the worker thread.
    pub(crate) fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Job currently claimed or executing on this worker, if any.
    pub fn current_job(&self) -> Option<JobId> {
        self.current_job.lock().map(|g| g.clone()).unwrap_or(None)
    }

    /// Ask the worker to stop taking new work. Does not wait.
    ///
    /// Once this returns, a `None` from [`current_job`](Self::current_job)
    /// means the worker will not claim anything else.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    /// Request stop and wait for the thread to exit.
    ///
    /// A job in flight runs to completion (or to its timeout) first.
    pub fn join(mut self) {
        self.request_stop();
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                error!(worker = self.id, "worker thread panicked");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

/// A single execution unit polling the shared job store.
pub struct Worker {
    id: usize,
    store: Arc<dyn JobStore>,
    config: Arc<Config>,
    executor: Box<dyn Execute>,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    current_job: Arc<Mutex<Option<JobId>>>,
}

impl Worker {
    pub fn new(id: usize, store: Arc<dyn JobStore>, config: Arc<Config>) -> io::Result<Self> {
        Ok(Self::with_executor(id, store, config, CommandExecutor::new()?))
    }

    /// Worker that runs commands through `executor` instead of the shell.
    pub fn with_executor(
        id: usize,
        store: Arc<dyn JobStore>,
        config: Arc<Config>,
        executor: impl Execute + 'static,
    ) -> Self {
        Self {
            id,
            store,
            config,
            executor: Box::new(executor),
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            current_job: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Spawn the worker loop on its own thread.
    pub fn spawn(self) -> io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let id = self.id;
        let stop_requested = self.stop_requested.clone();
        let running = self.running.clone();
        let current_job = self.current_job.clone();

        running.store(true, Ordering::SeqCst);
        let join = thread::Builder::new()
            .name(format!("queuectl-worker-{id}"))
            .spawn(move || worker_loop(self, shutdown_rx));

        let join = match join {
            Ok(join) => join,
            Err(err) => {
                running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        Ok(WorkerHandle {
            id,
            shutdown: shutdown_tx,
            stop_requested,
            running,
            current_job,
            join: Some(join),
        })
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// One poll iteration against a settings snapshot.
    ///
    /// Returns the state the processed job ended in, or `None` when nothing
    /// could be claimed.
    pub fn poll_once(&self, settings: &QueueSettings) -> Result<Option<JobState>, JobStoreError> {
        let result = match self.claim_next() {
            Ok(Some(job)) => self.process(job, settings).map(Some),
            other => other.map(|_| None),
        };
        self.set_current(None);
        result
    }

    /// Try the head of the pending list, then the head of the retry list.
    fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let head = self.store.eligible_pending()?.into_iter().next();
        if let Some(job) = self.claim_head(head, JobState::Pending)? {
            return Ok(Some(job));
        }

        let head = self.store.eligible_retry()?.into_iter().next();
        self.claim_head(head, JobState::Failed)
    }

    fn claim_head(&self, head: Option<Job>, from: JobState) -> Result<Option<Job>, JobStoreError> {
        let Some(head) = head else {
            return Ok(None);
        };

        // Publish before checking the stop flag: a stopping pool that sees no
        // current job can rely on this worker never claiming again.
        self.set_current(Some(head.id.clone()));
        if self.stop_requested() {
            self.set_current(None);
            return Ok(None);
        }

        match self.store.try_claim(&head.id, from)? {
            ClaimOutcome::Claimed(job) => Ok(Some(job)),
            ClaimOutcome::Stale => {
                self.set_current(None);
                debug!(worker = self.id, job_id = %head.id, from = %from, "lost claim race");
                Ok(None)
            }
        }
    }

    fn process(&self, mut job: Job, settings: &QueueSettings) -> Result<JobState, JobStoreError> {
        info!(
            worker = self.id,
            job_id = %job.id,
            attempt = job.attempts + 1,
            command = %job.command,
            "executing job"
        );

        let timeout = settings.job_timeout();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.executor.execute(&job.command, timeout)
        }))
        .map(|report| report.into_result())
        .unwrap_or_else(|_| {
            Err(ExecutionFailure {
                kind: Some(ExecutionErrorKind::Other),
                message: "Unexpected error: executor panicked".to_string(),
                output: AttemptOutput::default(),
            })
        });

        let now = Utc::now();
        match result {
            Ok(output) => {
                job.complete(output, now)?;
                self.store.put(&job)?;
                info!(worker = self.id, job_id = %job.id, elapsed = ?job.execution_time, "job completed");
            }
            Err(failure) => match job.fail(failure.message, failure.output, settings.backoff_base, now)? {
                FailureOutcome::Retry { delay } => {
                    self.store.put(&job)?;
                    warn!(
                        worker = self.id,
                        job_id = %job.id,
                        attempts = job.attempts,
                        max_retries = job.max_retries,
                        kind = ?failure.kind,
                        retry_in_secs = delay.as_secs_f64(),
                        error = job.error_message.as_deref().unwrap_or_default(),
                        "job failed; retry scheduled"
                    );
                }
                FailureOutcome::Dead => {
                    self.store.put(&job)?;
                    warn!(
                        worker = self.id,
                        job_id = %job.id,
                        attempts = job.attempts,
                        kind = ?failure.kind,
                        error = job.error_message.as_deref().unwrap_or_default(),
                        "job moved to dead-letter queue"
                    );
                }
            },
        }

        Ok(job.state)
    }

    fn set_current(&self, job: Option<JobId>) {
        if let Ok(mut current) = self.current_job.lock() {
            *current = job;
        }
    }
}

fn worker_loop(worker: Worker, shutdown_rx: mpsc::Receiver<()>) {
    info!(worker = worker.id, "worker started");

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) if worker.stop_requested() => break,
            Err(TryRecvError::Empty) => {}
        }

        // Re-read every iteration so config changes apply without a restart.
        let settings = worker.config.settings();

        match worker.poll_once(&settings) {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => {
                error!(worker = worker.id, error = %e, "worker poll failed");
            }
        }

        match shutdown_rx.recv_timeout(settings.poll_interval()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    worker.running.store(false, Ordering::SeqCst);
    info!(worker = worker.id, "worker stopped");
}
