//! # API Error Types Module
//!
//! This module defines the server-wide error type for the Docflow
//! orchestrator, providing standardized error handling and HTTP response
//! mapping for every operation the REST adapter exposes.
//!
//! ## Overview
//!
//! The error system provides:
//! - **Standardized Error Types**: one consistent error enum across the
//!   HTTP surface and the services behind it
//! - **HTTP Response Mapping**: automatic conversion to appropriate HTTP
//!   status codes through `IntoResponse`
//! - **Error Conversion**: `From` impls lift store, broker, and
//!   submission errors into the API taxonomy
//! - **Client-Friendly Messages**: every response body carries a message,
//!   a machine-readable error type, and the status code
//!
//! ## Error Categories
//!
//! The taxonomy follows the caller's point of view:
//!
//! ### Validation
//! Input violates a precondition: unknown plugin, type-incompatible
//! workflow step, malformed identifier. Surfaced verbatim and never
//! retried.
//!
//! ### Authorization
//! The caller identity is missing or lacks rights to the entity, for
//! example a job whose document belongs to another user.
//!
//! ### Not-found
//! The entity is absent or not owned by the caller. Ownership failures on
//! lookups deliberately read as not-found so existence does not leak.
//!
//! ### Conflict
//! Duplicate workflow step, cancelling an already-terminal job, and
//! similar state clashes. Distinguished by error type in the body even
//! though the wire status is 400.
//!
//! ### Transient-external
//! Broker disconnects and storage glitches. Retryable by the caller and
//! reported as service unavailability.
//!
//! ### Internal
//! Unexpected failures with no better classification. Logged server-side
//! before the response is built.
//!
//! ## HTTP Status Code Mapping
//!
//! Errors are automatically mapped to appropriate HTTP status codes:
//!
//! - **400 Bad Request**: validation failures and conflicts
//! - **401 Unauthorized**: missing or rejected caller identity
//! - **404 Not Found**: absent or foreign-owned entities
//! - **503 Service Unavailable**: broker or storage outages
//! - **500 Internal Server Error**: everything else
//!
//! ## Usage
//!
//! ```rust
//! use docflow_server::error::ApiError;
//!
//! // Create specific error types
//! let invalid = ApiError::validation("plugin sentiment cannot process 'audio'");
//! let missing = ApiError::not_found("workflow step not found");
//!
//! // Errors automatically convert to HTTP responses
//! let response = invalid.into_response();
//! ```
//!
//! Handlers return `Result<_, ApiError>` and rely on `?` to lift lower
//! layers:
//!
//! ```rust
//! async fn handler(state: AppState, job_id: Uuid) -> Result<Json<Value>, ApiError> {
//!     let job = state
//!         .stores
//!         .jobs
//!         .job(job_id)
//!         .await? // StoreError -> ApiError
//!         .ok_or_else(|| ApiError::not_found("job not found"))?;
//!     Ok(Json(json!({ "status": job.status.to_string() })))
//! }
//! ```
//!
//! ## Worker-Side Errors
//!
//! Failures inside worker tasks never reach this type. They become job
//! failures with `error_message` set on the record, and downstream
//! consumers observe them through the `job.failed` event rather than an
//! HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use docflow_sdk::error::{BrokerError, StoreError, SubmitError};

/// Errors surfaced by the HTTP adapter and the services behind it.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Input violates a precondition; never retried
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Caller identity missing or not permitted
    #[error("Authorization error: {message}")]
    Authorization { message: String },

    /// Entity absent or not owned by the caller
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Duplicate step, cancel of a terminal job, and similar
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Broker or storage glitch; retryable by the caller
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// Unexpected internal failure
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => ApiError::NotFound {
                message: format!("{entity} {id} not found"),
            },
            StoreError::Conflict { message } => ApiError::Conflict { message },
            StoreError::InvalidTransition { from, to } => ApiError::Conflict {
                message: format!("invalid job transition: {from} -> {to}"),
            },
            StoreError::Backend { message } => ApiError::Unavailable { message },
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        ApiError::Unavailable {
            message: e.to_string(),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::UnknownPlugin { name } => ApiError::Validation {
                message: format!("unknown plugin: {name}"),
            },
            SubmitError::Store(e) => e.into(),
            SubmitError::Broker(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::Authorization { .. } => (StatusCode::UNAUTHORIZED, "authorization_error"),
            ApiError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            // Conflicts surface as 400 like other caller mistakes
            // (cancelling a terminal job, duplicating a step).
            ApiError::Conflict { .. } => (StatusCode::BAD_REQUEST, "conflict"),
            ApiError::Unavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
            ApiError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}
