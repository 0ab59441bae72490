//! HTTP transport seam and failure interpretation.
//!
//! Every request leaves the crate through a [`Transport`]. The production
//! implementation wraps `reqwest`; tests substitute fakes to simulate
//! failures that a mock server cannot produce (e.g. a failure with no
//! response at all).
//!
//! A non-2xx response is a transport failure. The failure keeps the status
//! and body so the caller can apply the error-message rule:
//!
//! - body is JSON with a `message` string → that string,
//! - otherwise → the raw transport error text.

use std::future::Future;
use std::pin::Pin;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::AppError;

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<reqwest::Response, TransportFailure>> + Send + 'a>>;

/// Executes a fully built request.
///
/// Implementations must return `Err` for both network failures and non-2xx
/// responses, and `Ok` only for a successfully initiated response whose body
/// has not been consumed yet.
pub trait Transport: Send + Sync {
    fn execute(&self, request: reqwest::Request) -> TransportFuture<'_>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure Types
// ─────────────────────────────────────────────────────────────────────────────

/// Status and body of a response that was received but not accepted.
#[derive(Debug, Clone)]
pub struct FailedResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// A request that did not produce a usable response.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    /// Raw transport error text.
    pub message: String,
    /// The response, when the server answered with an error status.
    pub response: Option<FailedResponse>,
}

impl TransportFailure {
    /// A failure without any response (connection refused, timeout, ...).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
        }
    }

    /// A failure carrying the error response.
    pub fn with_response(message: impl Into<String>, status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            message: message.into(),
            response: Some(FailedResponse { status, body }),
        }
    }
}

/// Cybozu error body, e.g. `{"code":"GAIA_BL01","id":"...","message":"..."}`.
#[derive(Debug, Deserialize)]
struct WireCybozuError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn parse_error_body(response: &FailedResponse) -> Option<WireCybozuError> {
    serde_json::from_slice::<WireCybozuError>(&response.body).ok()
}

/// Applies the error-message rule to a failure.
pub fn extract_error_message(failure: &TransportFailure) -> String {
    failure
        .response
        .as_ref()
        .and_then(parse_error_body)
        .and_then(|body| body.message)
        .unwrap_or_else(|| failure.message.clone())
}

impl From<TransportFailure> for AppError {
    fn from(failure: TransportFailure) -> Self {
        let message = extract_error_message(&failure);
        let status = failure.response.as_ref().map(|r| r.status.as_u16());
        let code = failure
            .response
            .as_ref()
            .and_then(parse_error_body)
            .and_then(|body| body.code);

        AppError::Transfer {
            message,
            status,
            code,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReqwestTransport
// ─────────────────────────────────────────────────────────────────────────────

/// Production transport backed by a `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: reqwest::Request) -> TransportFuture<'_> {
        Box::pin(async move {
            // without_url(): the query may carry a fileKey
            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| TransportFailure::new(e.without_url().to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .unwrap_or_default();

            Err(TransportFailure::with_response(
                format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown error")
                ),
                status,
                body,
            ))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
