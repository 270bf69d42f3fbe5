//! Background job system: persistence, execution, workers and the pool.
//!
//! ## Components
//!
//! - `JobStore`: persistence with an atomic claim (`JsonFileJobStore` on disk)
//! - `CommandExecutor`: runs a job's shell command under a timeout (`Execute` is the seam)
//! - `Worker`: claims jobs and records the outcome (retry with backoff or DLQ)
//! - `WorkerPool`: starts workers and drains them on stop

pub mod executor;
pub mod pool;
pub mod store;
pub mod worker;

pub use executor::{CommandExecutor, Execute, ExecutionErrorKind, ExecutionFailure, ExecutionReport};
pub use pool::{DEFAULT_GRACE_PERIOD, PoolError, PoolMonitor, PoolShutdown, WorkerPool};
pub use store::{ClaimOutcome, JobStore, JobStoreError, JsonFileJobStore};
pub use worker::{Worker, WorkerHandle};
