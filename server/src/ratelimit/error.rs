//! Rate limiting error types.
//!
//! `StoreError` never leaves the gate; it is absorbed into a [`Decision`].
//! `RateLimitError` is what the HTTP layer returns for a rejected request.
//!
//! [`Decision`]: crate::ratelimit::Decision

use std::time::Duration;

use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure talking to the shared counter store for one call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network or command error reported by the client.
    #[error("shared store unavailable: {0}")]
    Unavailable(#[from] fred::error::Error),
    /// The call did not complete within the configured timeout.
    #[error("shared store call timed out after {0:?}")]
    Timeout(Duration),
    /// The store answered with something other than `{count, ttl}`.
    #[error("malformed reply from shared store: {0}")]
    MalformedReply(String),
}

/// Rejections surfaced to HTTP callers.
#[derive(Debug)]
pub enum RateLimitError {
    /// Request exceeded the rate limit.
    LimitExceeded { retry_after: u64 },
}

/// JSON response body for rate limit errors.
#[derive(Serialize)]
pub struct RateLimitErrorResponse {
    /// Error code identifier.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Seconds to wait before retrying.
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        match self {
            Self::LimitExceeded { retry_after } => {
                let body = RateLimitErrorResponse {
                    error: "rate_limited",
                    message: format!("Too many requests. Wait {retry_after} seconds."),
                    retry_after,
                };
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
        }
    }
}
