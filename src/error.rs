//! # Error Handling
//!
//! Two error surfaces live here:
//!
//! - [`BridgeError`] is the taxonomy used inside the call-bridge core. The
//!   variants carry their propagation policy: conversion and protocol errors
//!   are absorbed per-frame/per-message to keep a bridge alive, connection
//!   and setup errors end exactly one session, and admission errors are
//!   rejected before any resources are allocated.
//! - [`AppError`] is the HTTP-facing error type, converted into JSON error
//!   responses by the `ResponseError` impl.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "capacity_exceeded",
//!     "message": "session ceiling of 10 reached",
//!     "timestamp": "2026-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors raised by the call-bridge core.
#[derive(Debug)]
pub enum BridgeError {
    /// Malformed or truncated audio payload. Non-fatal: the frame is dropped
    /// and the bridge continues.
    Conversion(String),

    /// Unrecognized or malformed wire message. Non-fatal: the message is
    /// ignored and logged.
    Protocol(String),

    /// Either peer socket closed or errored. Fatal to the session.
    Connection(String),

    /// The agent-side connection could not be established. Fatal during
    /// session setup; the session never reaches `Active`.
    UpstreamSetup(String),

    /// Admission was refused because the concurrent-session ceiling is
    /// reached. No resources were allocated.
    CapacityExceeded { limit: usize },

    /// A session with this id already exists (including recently-ended
    /// sessions still inside the retention window).
    DuplicateSession(String),

    /// No session with this id is known to the registry.
    SessionNotFound(String),

    /// No dialer adapter is registered under this vendor name.
    UnknownVendor(String),
}

impl BridgeError {
    /// Whether this error ends the session it occurred in.
    ///
    /// Per-frame and per-message errors are absorbed locally; everything
    /// else terminates exactly one session, never the process.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BridgeError::Conversion(_) | BridgeError::Protocol(_))
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Conversion(msg) => write!(f, "audio conversion error: {}", msg),
            BridgeError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            BridgeError::Connection(msg) => write!(f, "connection error: {}", msg),
            BridgeError::UpstreamSetup(msg) => write!(f, "agent setup error: {}", msg),
            BridgeError::CapacityExceeded { limit } => {
                write!(f, "session ceiling of {} reached", limit)
            }
            BridgeError::DuplicateSession(id) => write!(f, "session '{}' already exists", id),
            BridgeError::SessionNotFound(id) => write!(f, "session '{}' not found", id),
            BridgeError::UnknownVendor(name) => write!(f, "dialer '{}' not registered", name),
        }
    }
}

impl std::error::Error for BridgeError {}

/// HTTP-facing application errors.
#[derive(Debug)]
pub enum AppError {
    /// Server-side problems (500)
    Internal(String),

    /// Client sent invalid or malformed data (400)
    BadRequest(String),

    /// Requested resource was not found (404)
    NotFound(String),

    /// Missing or invalid API key (401)
    Unauthorized(String),

    /// Admission refused: session ceiling reached (503)
    CapacityExceeded(String),

    /// Configuration file or environment variable problems (500)
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::Unauthorized(msg) => (
                actix_web::http::StatusCode::UNAUTHORIZED,
                "unauthorized",
                msg.clone(),
            ),
            AppError::CapacityExceeded(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "capacity_exceeded",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
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

/// Bridge errors surfaced over HTTP keep their admission semantics: a full
/// registry is 503, unknown ids and vendors are 404, setup failures are 502-ish
/// internals reported to the caller that requested the session.
impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::CapacityExceeded { .. } => AppError::CapacityExceeded(err.to_string()),
            BridgeError::SessionNotFound(_) | BridgeError::UnknownVendor(_) => {
                AppError::NotFound(err.to_string())
            }
            BridgeError::DuplicateSession(_) => AppError::BadRequest(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

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

/// Type alias for Results that use the HTTP error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_errors_are_not_fatal() {
        assert!(!BridgeError::Conversion("odd length".into()).is_fatal());
        assert!(!BridgeError::Protocol("bad json".into()).is_fatal());
        assert!(BridgeError::Connection("peer closed".into()).is_fatal());
        assert!(BridgeError::UpstreamSetup("timeout".into()).is_fatal());
        assert!(BridgeError::CapacityExceeded { limit: 10 }.is_fatal());
    }

    #[test]
    fn test_capacity_maps_to_service_unavailable() {
        let app: AppError = BridgeError::CapacityExceeded { limit: 10 }.into();
        assert!(matches!(app, AppError::CapacityExceeded(_)));

        let app: AppError = BridgeError::UnknownVendor("plivo".into()).into();
        assert!(matches!(app, AppError::NotFound(_)));
    }
}
