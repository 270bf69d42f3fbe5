use axum::{routing::get, Router};

pub mod config;
pub mod dlq;
pub mod jobs;
pub mod system;
pub mod workers;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .route("/status", get(system::status))
        .route("/stats", get(system::stats))
        .nest("/jobs", jobs::router())
        .nest("/dlq", dlq::router())
        .nest("/config", config::router())
        .nest("/workers", workers::router())
}
