use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use queuectl_core::DomainError;
use queuectl_infra::config::ConfigError;
use queuectl_infra::context::ServiceError;
use queuectl_infra::jobs::PoolError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        ServiceError::Config(e) => config_error_to_response(e),
        ServiceError::Pool(e) => pool_error_to_response(e),
        ServiceError::Store(e) => {
            tracing::error!(error = %e, "job store failure");
            internal_error()
        }
    }
}

fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::AlreadyExists(_) => json_error(StatusCode::BAD_REQUEST, "already_exists", message),
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::InvalidTransition { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_transition", message)
        }
    }
}

fn config_error_to_response(err: ConfigError) -> axum::response::Response {
    match err {
        ConfigError::UnknownKey(_) | ConfigError::InvalidValue { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_config", err.to_string())
        }
        other => {
            tracing::error!(error = %other, "configuration write failed");
            internal_error()
        }
    }
}

fn pool_error_to_response(err: PoolError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        PoolError::AlreadyRunning => json_error(StatusCode::BAD_REQUEST, "already_running", message),
        PoolError::NotRunning => json_error(StatusCode::BAD_REQUEST, "not_running", message),
        PoolError::InvalidWorkerCount => {
            json_error(StatusCode::BAD_REQUEST, "invalid_worker_count", message)
        }
        PoolError::Spawn(e) => {
            tracing::error!(error = %e, "worker spawn failed");
            internal_error()
        }
    }
}

/// Undecodable or wrongly typed request bodies are validation errors.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text())
}

pub fn internal_error() -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal server error",
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
