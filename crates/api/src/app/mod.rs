//! HTTP API application wiring (Axum router + shared context).
//!
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use queuectl_infra::context::{AppContext, ServiceResult};

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", routes::router())
        .layer(ServiceBuilder::new().layer(Extension(ctx)))
}

/// Run a context call on the blocking pool.
///
/// Every context operation touches the job file, and stopping workers can
/// block for the whole grace period.
pub async fn blocking<T, F>(ctx: Arc<AppContext>, f: F) -> Result<T, axum::response::Response>
where
    T: Send + 'static,
    F: FnOnce(&AppContext) -> ServiceResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&ctx)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(errors::service_error_to_response(e)),
        Err(e) => {
            tracing::error!(error = %e, "blocking task failed");
            Err(errors::internal_error())
        }
    }
}
