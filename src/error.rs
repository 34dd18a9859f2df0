//! # Error Handling
//!
//! Two error families live here:
//!
//! - **`WakeError`**: failures inside the wake word pipeline (keyword
//!   resolution, detector construction, audio conversion, event ordering).
//!   Every variant knows whether it ends the client's session.
//! - **`AppError`**: failures of the HTTP surface, rendered as JSON responses.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "not_found",
//!     "message": "no keyword named 'hey_bob'",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Errors raised by the keyword registry, detectors and sessions.
#[derive(Debug, Error)]
pub enum WakeError {
    /// Requested keyword is not present in any discovery directory.
    #[error("no keyword named '{0}'")]
    UnknownKeyword(String),

    /// Audio arrived before any keyword was selected and the configured
    /// default keyword could not be loaded either.
    #[error("audio received without an active keyword and default keyword '{keyword}' is unavailable: {reason}")]
    MalformedEventSequence { keyword: String, reason: String },

    /// The detector backend refused to build a handle.
    #[error("failed to load detector for '{keyword}': {reason}")]
    DetectorLoad { keyword: String, reason: String },

    /// Inbound audio uses a layout the converter cannot read.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// The keyword settings table is not valid TOML.
    #[error("invalid keyword settings table: {0}")]
    Settings(#[from] toml::de::Error),
}

impl WakeError {
    /// Whether the owning session has to be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WakeError::MalformedEventSequence { .. })
    }

    /// Short machine-readable code sent to clients in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            WakeError::UnknownKeyword(_) => "unknown_keyword",
            WakeError::MalformedEventSequence { .. } => "malformed_event_sequence",
            WakeError::DetectorLoad { .. } => "detector_load",
            WakeError::UnsupportedFormat(_) => "unsupported_format",
            WakeError::Settings(_) => "settings",
        }
    }
}

/// Errors returned by HTTP handlers.
///
/// ## Status Code Mapping:
/// - Internal → 500
/// - BadRequest → 400
/// - NotFound → 404
/// - Unavailable → 503
#[derive(Debug)]
pub enum AppError {
    /// Unexpected server-side failure
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource (usually a keyword) does not exist
    NotFound(String),

    /// Server is at its session limit
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Keyword lookups surface as 404s, everything else is the server's fault.
impl From<WakeError> for AppError {
    fn from(err: WakeError) -> Self {
        match err {
            WakeError::UnknownKeyword(_) => AppError::NotFound(err.to_string()),
            WakeError::UnsupportedFormat(_) => AppError::BadRequest(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
