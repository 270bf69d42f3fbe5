//! Job storage implementations.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use queuectl_core::{DomainError, DomainResult, Job, JobId, JobState};

/// Job store abstraction.
///
/// Every mutation is all-or-nothing: either the whole updated map is durable,
/// or the call fails and nothing changed.
pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job by id.
    fn put(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Insert a job whose id must not exist yet.
    fn insert(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Get a job by ID.
    fn get(&self, id: &JobId) -> Result<Option<Job>, JobStoreError>;

    /// List jobs, optionally filtered by state, oldest first.
    fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, JobStoreError>;

    /// Delete a job. Returns whether it existed.
    fn delete(&self, id: &JobId) -> Result<bool, JobStoreError>;

    /// Remove every job.
    fn clear(&self) -> Result<(), JobStoreError>;

    /// `Pending` jobs runnable at `now`, by priority (desc) then creation time (asc).
    fn eligible_pending_at(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError>;

    /// `Failed` jobs with budget left whose backoff has elapsed at `now`.
    fn eligible_retry_at(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError>;

    /// Atomically move a job from `expected` to `Processing`.
    ///
    /// The state check and the write happen under one critical section, so at
    /// most one caller can win for a given job and state.
    fn try_claim(&self, id: &JobId, expected: JobState) -> Result<ClaimOutcome, JobStoreError>;

    /// Atomically apply `apply` to the stored job and persist the result.
    ///
    /// If `apply` rejects the change nothing is written.
    fn update(
        &self,
        id: &JobId,
        apply: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError>;

    fn eligible_pending(&self) -> Result<Vec<Job>, JobStoreError> {
        self.eligible_pending_at(Utc::now())
    }

    fn eligible_retry(&self) -> Result<Vec<Job>, JobStoreError> {
        self.eligible_retry_at(Utc::now())
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now holds the job; this is the persisted `Processing` record.
    Claimed(Job),
    /// The job was gone or no longer in the expected state.
    Stale,
}

/// Job store error.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    Rejected(#[from] DomainError),
    #[error("failed to encode job store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write job store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("job store lock poisoned")]
    Poisoned,
}

type JobMap = BTreeMap<JobId, Job>;

/// Decoded view of the store file.
///
/// Records that fail to decode stay in `unreadable` verbatim and are written
/// back unchanged, so an unrelated write never drops them.
#[derive(Debug, Default)]
struct Snapshot {
    jobs: JobMap,
    unreadable: serde_json::Map<String, serde_json::Value>,
}

impl Snapshot {
    fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id) || self.unreadable.contains_key(id.as_str())
    }
}

/// Job store backed by a single JSON object file, keyed by job id.
///
/// The whole map is the unit of durability: each mutation re-reads the file,
/// applies the change and atomically replaces the file. A file that cannot be
/// parsed at all reads as an empty map and is healed by the next write; a
/// single malformed record is hidden from reads but preserved on disk.
#[derive(Debug)]
pub struct JsonFileJobStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileJobStore {
    /// Open (creating if needed) the store file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JobStoreError> {
        let store = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };

        if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| store.write_error(source))?;
        }
        if !store.path.exists() {
            store.save(&Snapshot::default())?;
        }

        Ok(store)
    }

    pub fn arc(path: impl Into<PathBuf>) -> Result<Arc<Self>, JobStoreError> {
        Ok(Arc::new(Self::open(path)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: io::Error) -> JobStoreError {
        JobStoreError::Write {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Snapshot {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Snapshot::default(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "job store unreadable; treating as empty");
                return Snapshot::default();
            }
        };

        let records: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "job store corrupt; treating as empty");
                return Snapshot::default();
            }
        };

        let mut snapshot = Snapshot::default();
        for (key, value) in records {
            match serde_json::from_value::<Job>(value.clone()) {
                Ok(job) if job.id.as_str() == key => {
                    snapshot.jobs.insert(job.id.clone(), job);
                }
                Ok(job) => {
                    warn!(key = %key, job_id = %job.id, "skipping job record stored under a foreign key");
                    snapshot.unreadable.insert(key, value);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping malformed job record");
                    snapshot.unreadable.insert(key, value);
                }
            }
        }
        snapshot
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), JobStoreError> {
        let mut records = snapshot.unreadable.clone();
        for (id, job) in &snapshot.jobs {
            records.insert(id.to_string(), serde_json::to_value(job)?);
        }
        let encoded = serde_json::to_vec_pretty(&records)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, encoded).map_err(|source| self.write_error(source))?;
        fs::rename(&tmp, &self.path).map_err(|source| self.write_error(source))?;
        Ok(())
    }

    /// Run `f` against the current map while holding the store lock.
    fn read<R>(&self, f: impl FnOnce(&JobMap) -> R) -> Result<R, JobStoreError> {
        let _guard = self.lock.lock().map_err(|_| JobStoreError::Poisoned)?;
        Ok(f(&self.load().jobs))
    }

    /// Read-modify-write under the store lock. `f` returns whether it changed the map.
    fn write<R>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<(R, bool), JobStoreError>,
    ) -> Result<R, JobStoreError> {
        let _guard = self.lock.lock().map_err(|_| JobStoreError::Poisoned)?;
        let mut snapshot = self.load();
        let (result, dirty) = f(&mut snapshot)?;
        if dirty {
            self.save(&snapshot)?;
        }
        Ok(result)
    }
}

fn by_schedule(jobs: &mut [Job]) {
    // stable: ties keep id order
    jobs.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

impl JobStore for JsonFileJobStore {
    fn put(&self, job: &Job) -> Result<(), JobStoreError> {
        self.write(|snapshot| {
            let mut job = job.clone();
            job.updated_at = Utc::now();
            snapshot.unreadable.remove(job.id.as_str());
            snapshot.jobs.insert(job.id.clone(), job);
            Ok(((), true))
        })
    }

    fn insert(&self, job: &Job) -> Result<(), JobStoreError> {
        self.write(|snapshot| {
            if snapshot.contains(&job.id) {
                return Err(JobStoreError::AlreadyExists(job.id.clone()));
            }
            snapshot.jobs.insert(job.id.clone(), job.clone());
            Ok(((), true))
        })
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>, JobStoreError> {
        self.read(|jobs| jobs.get(id).cloned())
    }

    fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, JobStoreError> {
        let mut result: Vec<_> = self.read(|jobs| {
            jobs.values()
                .filter(|j| state.is_none_or(|s| j.state == s))
                .cloned()
                .collect()
        })?;

        result.sort_by_key(|j| j.created_at);
        Ok(result)
    }

    fn delete(&self, id: &JobId) -> Result<bool, JobStoreError> {
        self.write(|snapshot| {
            let removed_job = snapshot.jobs.remove(id).is_some();
            let removed_raw = snapshot.unreadable.remove(id.as_str()).is_some();
            let existed = removed_job || removed_raw;
            Ok((existed, existed))
        })
    }

    fn clear(&self) -> Result<(), JobStoreError> {
        self.write(|snapshot| {
            snapshot.jobs.clear();
            snapshot.unreadable.clear();
            Ok(((), true))
        })
    }

    fn eligible_pending_at(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let mut result: Vec<_> = self.read(|jobs| {
            jobs.values()
                .filter(|j| j.is_eligible_pending(now))
                .cloned()
                .collect()
        })?;

        by_schedule(&mut result);
        Ok(result)
    }

    fn eligible_retry_at(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let mut result: Vec<_> = self.read(|jobs| {
            jobs.values()
                .filter(|j| j.is_eligible_retry(now))
                .cloned()
                .collect()
        })?;

        by_schedule(&mut result);
        Ok(result)
    }

    fn try_claim(&self, id: &JobId, expected: JobState) -> Result<ClaimOutcome, JobStoreError> {
        self.write(|snapshot| {
            let Some(job) = snapshot.jobs.get_mut(id) else {
                return Ok((ClaimOutcome::Stale, false));
            };
            if job.state != expected || !expected.is_claimable() {
                return Ok((ClaimOutcome::Stale, false));
            }

            job.claim(Utc::now())?;
            debug!(job_id = %id, from = %expected, "job claimed");
            Ok((ClaimOutcome::Claimed(job.clone()), true))
        })
    }

    fn update(
        &self,
        id: &JobId,
        apply: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError> {
        self.write(|snapshot| {
            let job = snapshot
                .jobs
                .get_mut(id)
                .ok_or_else(|| JobStoreError::NotFound(id.clone()))?;

            let mut updated = job.clone();
            apply(&mut updated)?;
            updated.updated_at = Utc::now();
            *job = updated.clone();
            Ok((updated, true))
        })
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn put(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).put(job)
    }

    fn insert(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).insert(job)
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(id)
    }

    fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(state)
    }

    fn delete(&self, id: &JobId) -> Result<bool, JobStoreError> {
        (**self).delete(id)
    }

    fn clear(&self) -> Result<(), JobStoreError> {
        (**self).clear()
    }

    fn eligible_pending_at(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        (**self).eligible_pending_at(now)
    }

    fn eligible_retry_at(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        (**self).eligible_retry_at(now)
    }

    fn try_claim(&self, id: &JobId, expected: JobState) -> Result<ClaimOutcome, JobStoreError> {
        (**self).try_claim(id, expected)
    }

    fn update(
        &self,
        id: &JobId,
        apply: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError> {
        (**self).update(id, apply)
    }
}
