use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use queuectl_infra::context::AppContext;

use crate::app::blocking;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Per-state job counts and the live worker count.
pub async fn status(Extension(ctx): Extension<Arc<AppContext>>) -> axum::response::Response {
    match blocking(ctx, |ctx| ctx.status()).await {
        Ok(status) => Json(status).into_response(),
        Err(resp) => resp,
    }
}

pub async fn stats(Extension(ctx): Extension<Arc<AppContext>>) -> axum::response::Response {
    match blocking(ctx, |ctx| ctx.stats()).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(resp) => resp,
    }
}
