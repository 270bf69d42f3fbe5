use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use queuectl_infra::context::AppContext;

use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/start", post(start_workers))
        .route("/stop", post(stop_workers))
        .route("/status", get(worker_status))
}

pub async fn start_workers(
    Extension(ctx): Extension<Arc<AppContext>>,
    body: Result<Json<dto::StartWorkersRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let count = match usize::try_from(body.count) {
        Ok(count) if count >= 1 => count,
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_worker_count",
                "count must be at least 1",
            )
        }
    };

    match blocking(ctx, move |ctx| ctx.start_workers(count)).await {
        Ok(status) => Json(status).into_response(),
        Err(resp) => resp,
    }
}

/// Blocks until the pool drains or its grace period ends.
pub async fn stop_workers(Extension(ctx): Extension<Arc<AppContext>>) -> axum::response::Response {
    match blocking(ctx, |ctx| ctx.stop_workers()).await {
        Ok(shutdown) => Json(shutdown).into_response(),
        Err(resp) => resp,
    }
}

/// Waits behind an in-progress stop, since both share the pool lock.
pub async fn worker_status(Extension(ctx): Extension<Arc<AppContext>>) -> axum::response::Response {
    match blocking(ctx, |ctx| Ok(ctx.worker_status())).await {
        Ok(status) => Json(status).into_response(),
        Err(resp) => resp,
    }
}
