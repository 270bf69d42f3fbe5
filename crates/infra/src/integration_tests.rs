//! Integration tests for the full queue pipeline.
//!
//! Tests: enqueue → WorkerPool → Executor → JobStore → status / DLQ
//!
//! Verifies:
//! - Jobs run to `Completed`, or retry with backoff and land in the DLQ
//! - Higher priority jobs are claimed first
//! - Stop waits for in-flight jobs
//! - Concurrent workers never execute the same job twice

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use queuectl_core::JobState;

    use crate::config::{Config, QueueSettings};
    use crate::context::{AppContext, EnqueueRequest, JOBS_FILE};
    use crate::jobs::{JobStore, JsonFileJobStore, WorkerPool};

    fn fast_settings() -> QueueSettings {
        QueueSettings {
            worker_poll_interval: 0.05,
            // small base so retries become eligible almost immediately
            backoff_base: 0.01,
            ..QueueSettings::default()
        }
    }

    fn setup() -> (tempfile::TempDir, AppContext) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileJobStore::arc(dir.path().join(JOBS_FILE)).unwrap();
        let config = Arc::new(Config::ephemeral(fast_settings()));
        let pool = WorkerPool::new(store.clone(), config.clone())
            .with_grace_period(Duration::from_secs(10));
        (dir, AppContext::with_pool(store, config, pool))
    }

    fn wait_until(what: &str, timeout: Duration, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + timeout;
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(25));
        }
    }

    fn state_of(ctx: &AppContext, id: &str) -> JobState {
        ctx.get(id).unwrap().state
    }

    #[test]
    fn successful_and_failing_jobs_reach_terminal_states() {
        let (_dir, ctx) = setup();
        ctx.enqueue(EnqueueRequest::new("j1", "true")).unwrap();
        ctx.enqueue(EnqueueRequest {
            max_retries: Some(1),
            ..EnqueueRequest::new("j2", "false")
        })
        .unwrap();

        ctx.start_workers(1).unwrap();
        wait_until("both jobs to settle", Duration::from_secs(10), || {
            state_of(&ctx, "j1") == JobState::Completed && state_of(&ctx, "j2") == JobState::Dead
        });
        ctx.stop_workers().unwrap();

        let dead = ctx.dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id.as_str(), "j2");
        assert_eq!(dead[0].attempts, 1);
        assert!(dead[0].error_message.as_deref().unwrap().starts_with("Max retries (1) exceeded"));

        let status = ctx.status().unwrap();
        assert_eq!((status.completed, status.dead, status.total), (1, 1, 2));

        let metrics = ctx.stats().unwrap();
        assert_eq!(metrics.measured, 2);
        assert_eq!(metrics.success_rate, 0.5);
    }

    #[test]
    fn retries_use_backoff_until_budget_is_spent() {
        let (_dir, ctx) = setup();
        ctx.enqueue(EnqueueRequest {
            max_retries: Some(3),
            ..EnqueueRequest::new("flaky", "echo broken 1>&2; exit 2")
        })
        .unwrap();

        ctx.start_workers(1).unwrap();
        wait_until("job to die", Duration::from_secs(10), || {
            state_of(&ctx, "flaky") == JobState::Dead
        });
        ctx.stop_workers().unwrap();

        let job = ctx.get("flaky").unwrap();
        assert_eq!(job.attempts, 3);
        assert!(job.error_message.unwrap().ends_with("Last error: broken"));
        assert_eq!(job.stderr.as_deref().map(str::trim), Some("broken"));
    }

    #[test]
    fn higher_priority_runs_first() {
        let (dir, ctx) = setup();
        let log = dir.path().join("order.log");

        ctx.enqueue(EnqueueRequest {
            priority: Some(1),
            ..EnqueueRequest::new("A", format!("echo A >> {}", log.display()))
        })
        .unwrap();
        ctx.enqueue(EnqueueRequest {
            priority: Some(10),
            ..EnqueueRequest::new("B", format!("echo B >> {}", log.display()))
        })
        .unwrap();

        ctx.start_workers(1).unwrap();
        wait_until("both jobs to complete", Duration::from_secs(10), || {
            ctx.status().unwrap().completed == 2
        });
        ctx.stop_workers().unwrap();

        let order = fs::read_to_string(&log).unwrap();
        assert_eq!(order.split_whitespace().collect::<Vec<_>>(), ["B", "A"]);
    }

    #[test]
    fn stop_drains_in_flight_job() {
        let (_dir, ctx) = setup();
        ctx.enqueue(EnqueueRequest::new("slow", "sleep 1")).unwrap();

        ctx.start_workers(1).unwrap();
        wait_until("job to be claimed", Duration::from_secs(5), || {
            state_of(&ctx, "slow") == JobState::Processing
        });

        let shutdown = ctx.stop_workers().unwrap();
        assert!(shutdown.drained);
        assert_eq!(state_of(&ctx, "slow"), JobState::Completed);
        assert_eq!(ctx.worker_status().active_count, 0);
    }

    #[test]
    fn concurrent_workers_execute_each_job_once() {
        let (dir, ctx) = setup();
        let log = dir.path().join("runs.log");

        for i in 0..12 {
            ctx.enqueue(EnqueueRequest::new(
                format!("job-{i}"),
                format!("echo job-{i} >> {}", log.display()),
            ))
            .unwrap();
        }

        ctx.start_workers(4).unwrap();
        wait_until("all jobs to complete", Duration::from_secs(20), || {
            ctx.status().unwrap().completed == 12
        });
        ctx.stop_workers().unwrap();

        let runs = fs::read_to_string(&log).unwrap();
        let mut lines: Vec<&str> = runs.lines().collect();
        assert_eq!(lines.len(), 12, "some job ran more than once: {runs}");
        lines.sort_unstable();
        lines.dedup();
        assert_eq!(lines.len(), 12);
        assert!(ctx
            .list(None)
            .unwrap()
            .iter()
            .all(|job| job.attempts == 0 && job.state == JobState::Completed));
    }

    #[test]
    fn requeued_dead_job_runs_again() {
        let (dir, ctx) = setup();
        let marker = dir.path().join("ready");

        // fails until the marker file exists
        ctx.enqueue(EnqueueRequest {
            max_retries: Some(0),
            ..EnqueueRequest::new("gated", format!("test -f {}", marker.display()))
        })
        .unwrap();

        ctx.start_workers(1).unwrap();
        wait_until("job to die", Duration::from_secs(5), || {
            state_of(&ctx, "gated") == JobState::Dead
        });

        fs::write(&marker, b"").unwrap();
        let requeued = ctx.requeue_dead("gated").unwrap();
        assert_eq!(requeued.attempts, 0);

        wait_until("requeued job to complete", Duration::from_secs(5), || {
            state_of(&ctx, "gated") == JobState::Completed
        });
        ctx.stop_workers().unwrap();
        assert!(ctx.dead_letters().unwrap().is_empty());
    }

    #[test]
    fn store_survives_reopen() {
        let (dir, ctx) = setup();
        ctx.enqueue(EnqueueRequest::new("persisted", "true")).unwrap();
        drop(ctx);

        let reopened = JsonFileJobStore::open(dir.path().join(JOBS_FILE)).unwrap();
        let jobs = reopened.list(Some(JobState::Pending)).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id.as_str(), "persisted");
    }
}
