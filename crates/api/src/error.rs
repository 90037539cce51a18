use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use provisioner_core::error::CoreError;
use provisioner_pipeline::orchestrator::OrchestratorError;
use provisioner_pipeline::store::StoreError;
use provisioner_worker::WorkerError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps domain, store and engine errors and implements [`IntoResponse`]
/// to produce consistent `{ "error", "code" }` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Request body failed `validator` checks.
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Store(store) => classify_store_error(store),
            AppError::Orchestrator(OrchestratorError::Store(store)) => classify_store_error(store),
            AppError::Orchestrator(OrchestratorError::Registry(err)) => {
                tracing::error!(error = %err, "Step registry error");
                internal()
            }
            AppError::Worker(WorkerError::Fetch(store)) => classify_store_error(store),
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                errors.to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Provisioning job with id {id} not found"),
        ),
        StoreError::Database(db) => classify_sqlx_error(db),
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Foreign key violations (23503) map to 404: the tenant or user is unknown.
/// - Unique constraint violations (23505) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503") => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Referenced tenant or user does not exist".to_string(),
        ),
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!(
                "Duplicate value violates unique constraint: {}",
                db_err.constraint().unwrap_or("unknown")
            ),
        ),
        other => {
            tracing::error!(error = %other, "Database error");
            internal()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_job_is_404() {
        let response = AppError::Store(StoreError::NotFound(9)).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn core_validation_is_400() {
        let response = AppError::Core(CoreError::Validation("bad code".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn pool_timeout_is_500() {
        let response =
            AppError::Orchestrator(OrchestratorError::Store(StoreError::Database(
                sqlx::Error::PoolTimedOut,
            )))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
