//! Error taxonomy for the correlation and lifecycle engine.
//!
//! Every mutating operation either fully commits or fully aborts; a
//! failure surfaces as one of these variants and leaves no partial state
//! behind. The HTTP layer maps variants to status codes in `api.rs`.

use axum::http::StatusCode;

/// Typed failure returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Required field missing or out of range. Rejected before any
    /// storage mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Actor is not allowed to perform the requested mutation.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Referenced incident, detection, or user does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Underlying storage failure; the enclosing transaction was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl EngineError {
    /// HTTP status code this error maps to at the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Permission(_) => StatusCode::FORBIDDEN,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
