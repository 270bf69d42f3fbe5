use chrono::{DateTime, Utc};
use serde::Deserialize;

use queuectl_infra::context::EnqueueRequest;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub command: String,
    pub max_retries: Option<u32>,
    pub priority: Option<i32>,
    pub run_at: Option<DateTime<Utc>>,
}

impl From<CreateJobRequest> for EnqueueRequest {
    fn from(body: CreateJobRequest) -> Self {
        Self {
            id: body.id,
            command: body.command,
            max_retries: body.max_retries,
            priority: body.priority,
            run_at: body.run_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub key: String,
    pub value: serde_json::Value,
}

/// Signed so a negative count is a 400, not a body rejection.
#[derive(Debug, Deserialize)]
pub struct StartWorkersRequest {
    #[serde(default = "default_worker_count")]
    pub count: i64,
}

fn default_worker_count() -> i64 {
    1
}
