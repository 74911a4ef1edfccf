//! Handler errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use turku_core::assign::AssignError;
use turku_core::db::DatabaseError;

use crate::auth::AuthError;
use crate::storage::ValidationError;

/// Every way a protocol operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad content type or an unparsable or incomplete body.
    #[error("{0}")]
    Transport(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Deliberately the same for unknown, disabled and mismatched
    /// credentials.
    #[error("Bad auth")]
    BadAuth,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("No storages are currently available")]
    Capacity,

    #[error("Concurrent modification, retry the request")]
    Conflict,

    /// Details are logged, never returned.
    #[error("Internal error")]
    Internal(String),
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Transport(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::BadAuth => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::Capacity => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Conflict(_) => Self::Conflict,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::BadAuth => Self::BadAuth,
            AuthError::Database(db) => db.into(),
            AuthError::Hash(msg) => Self::Internal(msg),
        }
    }
}

impl From<AssignError> for ApiError {
    fn from(_: AssignError) -> Self {
        Self::Capacity
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "Request failed");
        }
        (self.status(), self.to_string()).into_response()
    }
}
