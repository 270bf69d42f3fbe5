use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use queuectl_core::JobState;
use queuectl_infra::context::{AppContext, EnqueueRequest};

use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/:id", get(get_job).delete(delete_job))
        .route("/:id/retry", post(retry_job))
}

pub async fn create_job(
    Extension(ctx): Extension<Arc<AppContext>>,
    body: Result<Json<dto::CreateJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let req = EnqueueRequest::from(body);
    match blocking(ctx, move |ctx| ctx.enqueue(req)).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_jobs(
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let state = match query.state.as_deref().map(str::parse::<JobState>).transpose() {
        Ok(state) => state,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_state",
                "state must be one of: pending, processing, completed, failed, dead",
            )
        }
    };

    match blocking(ctx, move |ctx| ctx.list(state)).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_job(
    Extension(ctx): Extension<Arc<AppContext>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match blocking(ctx, move |ctx| ctx.get(&id)).await {
        Ok(job) => Json(job).into_response(),
        Err(resp) => resp,
    }
}

pub async fn delete_job(
    Extension(ctx): Extension<Arc<AppContext>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let target = id.clone();
    match blocking(ctx, move |ctx| ctx.delete(&target)).await {
        Ok(true) => Json(json!({ "deleted": id })).into_response(),
        Ok(false) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job not found: {id}"),
        ),
        Err(resp) => resp,
    }
}

/// Requeue a dead job.
pub async fn retry_job(
    Extension(ctx): Extension<Arc<AppContext>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match blocking(ctx, move |ctx| ctx.requeue_dead(&id)).await {
        Ok(job) => Json(job).into_response(),
        Err(resp) => resp,
    }
}
