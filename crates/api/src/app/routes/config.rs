use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use queuectl_infra::context::AppContext;

use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(get_config).post(set_config))
        .route("/reset", post(reset_config))
}

pub async fn get_config(Extension(ctx): Extension<Arc<AppContext>>) -> axum::response::Response {
    Json(ctx.config().get_all()).into_response()
}

/// Set one key; responds with the full settings after the change.
pub async fn set_config(
    Extension(ctx): Extension<Arc<AppContext>>,
    body: Result<Json<dto::SetConfigRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let result = blocking(ctx, move |ctx| {
        Ok(ctx.config().set(&body.key, &body.value)?)
    })
    .await;

    match result {
        Ok(settings) => Json(settings).into_response(),
        Err(resp) => resp,
    }
}

pub async fn reset_config(Extension(ctx): Extension<Arc<AppContext>>) -> axum::response::Response {
    match blocking(ctx, |ctx| Ok(ctx.config().reset()?)).await {
        Ok(settings) => Json(settings).into_response(),
        Err(resp) => resp,
    }
}
