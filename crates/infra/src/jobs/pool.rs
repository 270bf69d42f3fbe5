//! Worker pool lifecycle: start, graceful drain, stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::store::JobStore;
use super::worker::{Worker, WorkerHandle};
use crate::config::Config;

/// How long `stop` waits for in-flight jobs before joining anyway.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Worker pool error.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("workers are already running")]
    AlreadyRunning,
    #[error("no workers are running")]
    NotRunning,
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Summary of a completed `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolShutdown {
    pub workers: usize,
    /// Every worker was idle before the grace period ran out
    pub drained: bool,
}

/// Read-only view of a pool's state.
///
/// Cloned out of the pool so status queries never wait on a `start` or a
/// draining `stop` in progress.
#[derive(Debug, Clone, Default)]
pub struct PoolMonitor {
    running: Arc<AtomicBool>,
    workers: Arc<RwLock<Vec<Arc<AtomicBool>>>>,
}

impl PoolMonitor {
    /// Accepting work: between a successful `start` and the next `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Workers whose loop is still alive.
    pub fn active_count(&self) -> usize {
        self.read_workers(|w| w.iter().filter(|alive| alive.load(Ordering::SeqCst)).count())
    }

    /// Workers spawned by the current `start`.
    pub fn worker_count(&self) -> usize {
        self.read_workers(Vec::len)
    }

    fn read_workers<R>(&self, f: impl FnOnce(&Vec<Arc<AtomicBool>>) -> R) -> R {
        f(&self.workers.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_workers(&self, flags: Vec<Arc<AtomicBool>>) {
        *self.workers.write().unwrap_or_else(PoisonError::into_inner) = flags;
    }
}

/// Owns the set of running workers.
///
/// `start` and `stop` are meant to be driven by a single controller; other
/// readers go through [`WorkerPool::monitor`].
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    config: Arc<Config>,
    workers: Vec<WorkerHandle>,
    monitor: PoolMonitor,
    grace_period: Duration,
}

impl WorkerPool {
    pub fn new(store: Arc<dyn JobStore>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            workers: Vec::new(),
            monitor: PoolMonitor::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Shared view that stays live for the lifetime of the pool.
    pub fn monitor(&self) -> PoolMonitor {
        self.monitor.clone()
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Spawn `count` workers.
    pub fn start(&mut self, count: usize) -> Result<(), PoolError> {
        if self.is_running() {
            return Err(PoolError::AlreadyRunning);
        }
        if count == 0 {
            return Err(PoolError::InvalidWorkerCount);
        }

        for id in 1..=count {
            let spawned = Worker::new(id, self.store.clone(), self.config.clone())
                .and_then(Worker::spawn);

            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(err) => {
                    warn!(worker = id, error = %err, "failed to spawn worker; rolling back");
                    for handle in self.workers.drain(..) {
                        handle.join();
                    }
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        self.monitor
            .set_workers(self.workers.iter().map(WorkerHandle::running_flag).collect());
        self.monitor.running.store(true, Ordering::SeqCst);
        info!(workers = count, "worker pool started");
        Ok(())
    }

    /// Stop all workers, letting in-flight jobs finish.
    ///
    /// Signals every worker, waits up to the grace period for all of them to go
    /// idle, then joins them. A worker still executing after the grace period
    /// is joined anyway; only the executor's own timeout can cut a command short.
    pub fn stop(&mut self) -> Result<PoolShutdown, PoolError> {
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }

        info!(workers = self.workers.len(), "stopping worker pool");
        self.monitor.running.store(false, Ordering::SeqCst);
        for handle in &self.workers {
            handle.request_stop();
        }

        let deadline = Instant::now() + self.grace_period;
        let drained = loop {
            if self.workers.iter().all(|w| w.current_job().is_none()) {
                break true;
            }
            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            thread::sleep(DRAIN_CHECK_INTERVAL.min(deadline - now));
        };

        if !drained {
            let busy: Vec<String> = self
                .workers
                .iter()
                .filter_map(|w| w.current_job().map(|id| format!("{}:{id}", w.id())))
                .collect();
            warn!(busy = ?busy, "grace period elapsed with jobs in flight; joining anyway");
        }

        let workers = self.workers.len();
        for handle in self.workers.drain(..) {
            handle.join();
        }
        self.monitor.set_workers(Vec::new());

        info!(workers, drained, "worker pool stopped");
        Ok(PoolShutdown { workers, drained })
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    /// Workers whose loop is still alive.
    pub fn active_count(&self) -> usize {
        self.monitor.active_count()
    }

    /// Workers spawned by the current `start`.
    pub fn worker_count(&self) -> usize {
        self.monitor.worker_count()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use queuectl_core::{Job, JobId, JobState};

    use super::*;
    use crate::config::QueueSettings;
    use crate::jobs::store::JsonFileJobStore;

    fn pool() -> (tempfile::TempDir, WorkerPool) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileJobStore::arc(dir.path().join("jobs.json")).unwrap();
        let config = Arc::new(Config::ephemeral(QueueSettings {
            worker_poll_interval: 0.05,
            ..QueueSettings::default()
        }));
        (dir, WorkerPool::new(store, config))
    }

    #[test]
    fn start_and_stop_lifecycle() {
        let (_dir, mut pool) = pool();
        assert!(!pool.is_running());
        assert_eq!(pool.active_count(), 0);

        pool.start(3).unwrap();
        assert!(pool.is_running());
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.active_count(), 3);

        let shutdown = pool.stop().unwrap();
        assert_eq!(shutdown, PoolShutdown { workers: 3, drained: true });
        assert!(!pool.is_running());
        assert_eq!(pool.worker_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn double_start_and_idle_stop_are_rejected() {
        let (_dir, mut pool) = pool();
        assert!(matches!(pool.stop(), Err(PoolError::NotRunning)));
        assert!(matches!(pool.start(0), Err(PoolError::InvalidWorkerCount)));

        pool.start(1).unwrap();
        assert!(matches!(pool.start(1), Err(PoolError::AlreadyRunning)));
        pool.stop().unwrap();

        // restartable after a stop
        pool.start(2).unwrap();
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn grace_expiry_reports_undrained_but_still_joins() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileJobStore::arc(dir.path().join("jobs.json")).unwrap();
        let config = Arc::new(Config::ephemeral(QueueSettings {
            worker_poll_interval: 0.05,
            ..QueueSettings::default()
        }));
        let mut pool = WorkerPool::new(store.clone(), config)
            .with_grace_period(Duration::from_millis(300));

        let id = JobId::parse("long").unwrap();
        store.insert(&Job::new(id.clone(), "sleep 2").unwrap()).unwrap();
        pool.start(1).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.get(&id).unwrap().unwrap().state != JobState::Processing {
            assert!(Instant::now() < deadline, "job never claimed");
            thread::sleep(Duration::from_millis(20));
        }

        let shutdown = pool.stop().unwrap();
        assert_eq!(shutdown, PoolShutdown { workers: 1, drained: false });
        assert_eq!(store.get(&id).unwrap().unwrap().state, JobState::Completed);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn monitor_tracks_pool_without_borrowing_it() {
        let (_dir, mut pool) = pool();
        let monitor = pool.monitor();
        assert!(!monitor.is_running());

        pool.start(2).unwrap();
        assert!(monitor.is_running());
        assert_eq!(monitor.worker_count(), 2);
        assert_eq!(monitor.active_count(), 2);

        pool.stop().unwrap();
        assert!(!monitor.is_running());
        assert_eq!(monitor.worker_count(), 0);
        assert_eq!(monitor.active_count(), 0);
    }
}
