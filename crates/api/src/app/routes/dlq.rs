use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, routing::get, Json, Router};

use queuectl_infra::context::AppContext;

use crate::app::blocking;

pub fn router() -> Router {
    Router::new().route("/", get(list_dead_letters))
}

pub async fn list_dead_letters(
    Extension(ctx): Extension<Arc<AppContext>>,
) -> axum::response::Response {
    match blocking(ctx, |ctx| ctx.dead_letters()).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(resp) => resp,
    }
}
