//! Unified API error handling
//!
//! Every endpoint answers failures with the same JSON envelope.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::service::PipelineError;
use crate::service::document::DecodeError;
use crate::service::session_store::SessionStoreError;

/// Standard error response format
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,
    /// Short human-readable summary
    pub message: String,
    /// Error detail
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Unified API error type
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Missing or invalid request fields (400)
    #[error("{0}")]
    BadRequest(String),

    /// Uploaded file could not be turned into text (400)
    #[error("{0}")]
    InvalidDocument(String),

    /// Unknown session id (404)
    #[error("{0}")]
    SessionNotFound(String),

    /// Session is already running (409)
    #[error("{0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn message(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "Invalid request",
            ApiError::InvalidDocument(_) => "Failed to read document",
            ApiError::SessionNotFound(_) => "session not found",
            ApiError::Conflict(_) => "Session is already being analyzed",
            ApiError::Internal(_) => "Internal server error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidDocument(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "API error");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        HttpResponse::build(status).json(ErrorResponse {
            success: false,
            message: self.message().to_string(),
            error: self.to_string(),
            timestamp: Utc::now(),
        })
    }
}

// ============================================================================
// From conversions for service errors
// ============================================================================

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Session(SessionStoreError::NotFound(id)) => {
                ApiError::SessionNotFound(format!("No session with id {}", id))
            }
            PipelineError::Session(SessionStoreError::Busy(id)) => {
                ApiError::Conflict(format!("Session {} is already being analyzed", id))
            }
            PipelineError::InvalidProvider(e) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DecodeError> for ApiError {
    fn from(err: DecodeError) -> Self {
        ApiError::InvalidDocument(err.to_string())
    }
}
