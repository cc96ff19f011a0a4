// SPDX-License-Identifier: MIT

//! Application error types with consistent acknowledgement envelopes.
//!
//! Handlers never propagate an error up to the gateway loop: every outcome
//! converts to a structured `{success: ...}` acknowledgement via
//! [`AppError::ack_value`]. The taxonomy below is the client-visible
//! contract; the messages inside the variants are for operators only and are
//! never sent over the wire.

use serde_json::{json, Value};

/// Application error type that converts to acknowledgement envelopes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or invalid bearer token; refuses the handshake.
    #[error("Authentication required")]
    Unauthenticated,

    /// Authenticated but no access to the requested room or resource.
    /// The reason is never surfaced to the client.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Malformed payload, out-of-range coordinates, missing field.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Ping arrived inside the throttle window. Normal backpressure,
    /// not a failure from the client's perspective.
    #[error("Throttled")]
    Throttled,

    /// Resource does not exist or does not belong to the caller.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Hot-store, durable-store, or network failure. Logged at error level.
    #[error("Transient backend failure: {0}")]
    Transient(String),

    /// An invariant violation. Logged with full context; the connection
    /// may be dropped, and there is no automatic recovery.
    #[error("Invariant violation: {0}")]
    Fatal(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Transient(format!("redis: {}", e))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Transient(format!("postgres: {}", other)),
        }
    }
}

impl AppError {
    /// Convert a failed handler outcome into its acknowledgement payload.
    ///
    /// Transient and fatal failures are logged here so that call sites only
    /// deal with the envelope. Denials deliberately carry no reason.
    pub fn ack_value(&self) -> Value {
        match self {
            AppError::Throttled => json!({ "success": false, "throttled": true }),
            AppError::Unauthenticated => json!({ "success": false }),
            AppError::Forbidden(reason) => {
                tracing::debug!(reason = %reason, "Access denied");
                json!({ "success": false })
            }
            AppError::Validation(msg) => {
                tracing::debug!(error = %msg, "Rejected invalid payload");
                json!({ "success": false })
            }
            AppError::NotFound(what) => {
                tracing::debug!(what = %what, "Not found");
                json!({ "success": false })
            }
            AppError::Transient(msg) => {
                tracing::error!(error = %msg, "Transient backend failure");
                json!({ "success": false })
            }
            AppError::Fatal(msg) => {
                tracing::error!(error = %msg, "Invariant violation");
                json!({ "success": false })
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                json!({ "success": false })
            }
        }
    }

    /// True for errors a worker should retry (backend hiccups), false for
    /// errors that will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::Internal(_))
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
