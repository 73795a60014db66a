//! # Error Handling
//!
//! This module defines the application error type and how it becomes an HTTP response.
//!
//! ## Where errors come from:
//! - **Request boundary**: malformed JSON, missing multipart parts, oversized uploads
//! - **Gateways**: the speech-to-text, language model and text-to-speech providers
//! - **Turn orchestration**: empty transcriptions, sessions busy with another turn
//! - **Startup**: configuration problems
//!
//! ## Traits for Error Conversion
//! - **From trait**: Automatically converts between error types (so `?` just works)
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings

use crate::gateway::GatewayError;
use crate::orchestrator::TurnError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **NotFound**: Requested resource doesn't exist (404)
/// - **ConfigError**: Configuration problems (500)
/// - **ValidationError**: Request failed validation at the boundary (400)
/// - **EmptyTranscription**: Nothing intelligible was said (422)
/// - **SessionBusy**: Another turn is still running on the session (409)
/// - **Upstream**: A provider call failed (502/422/504/503 depending on how)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (disk I/O, unexpected states, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Speech-to-text produced no text
    EmptyTranscription,

    /// The session is locked by another in-flight turn
    SessionBusy(String),

    /// An upstream provider failed at the named pipeline stage
    Upstream { stage: &'static str, error: GatewayError },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::EmptyTranscription => write!(f, "No speech was recognised in the audio"),
            AppError::SessionBusy(id) => {
                write!(f, "Session '{}' is still processing a previous message", id)
            }
            AppError::Upstream { stage, error } => write!(f, "{} failed: {}", stage, error),
        }
    }
}

impl AppError {
    /// Map each error to its HTTP status and machine-readable type.
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::EmptyTranscription => (StatusCode::UNPROCESSABLE_ENTITY, "empty_transcription"),
            AppError::SessionBusy(_) => (StatusCode::CONFLICT, "session_busy"),
            AppError::Upstream { error, .. } => {
                let status = match error {
                    GatewayError::Unavailable { .. } => StatusCode::BAD_GATEWAY,
                    GatewayError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    GatewayError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, error.kind())
            }
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "upstream_timeout",
///     "message": "speech synthesis failed: murf timed out after 30000ms",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status_and_type().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = self.status_and_type();

        // Build the HTTP response with JSON body
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": self.to_string(),  // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// ## Usage:
/// When you use `?` with an anyhow::Error, it automatically becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(error: GatewayError) -> Self {
        AppError::Upstream { stage: "upstream call", error }
    }
}

impl From<TurnError> for AppError {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::Transcription(error) => AppError::Upstream { stage: "transcription", error },
            TurnError::Generation(error) => AppError::Upstream { stage: "response generation", error },
            TurnError::Synthesis(error) => AppError::Upstream { stage: "speech synthesis", error },
            TurnError::EmptyTranscription => AppError::EmptyTranscription,
            TurnError::SessionBusy(id) => AppError::SessionBusy(id),
        }
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
