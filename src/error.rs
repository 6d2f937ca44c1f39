//! Error handling and custom error types
//!
//! Every failure of a relay call ends up as one of these variants, and every
//! variant knows how to render itself as the `{ error, status }` body the
//! storefront client expects.

use crate::models::ErrorBody;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or empty upload field, or a request that is not multipart.
    #[error("{0}")]
    ClientInput(String),

    /// Network failure or timeout while talking to the upstream.
    #[error("Upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String, timed_out: bool },

    /// Upstream answered 2xx with a body the relay cannot interpret.
    #[error("Upstream contract error: {reason}")]
    UpstreamContract {
        reason: String,
        status: u16,
        body: String,
    },

    /// Upstream answered with a non-2xx status. An empty body falls back to
    /// the status reason phrase.
    #[error("{}", rejected_message(.status, .body))]
    UpstreamRejected { status: StatusCode, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn rejected_message(status: &StatusCode, body: &str) -> String {
    if !body.trim().is_empty() {
        return body.to_string();
    }
    match status.canonical_reason() {
        Some(reason) => format!("Upstream returned {} {}", status.as_u16(), reason),
        None => format!("Upstream returned status {}", status.as_u16()),
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ClientInput(_) => StatusCode::BAD_REQUEST,
            Error::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Error::UpstreamContract { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UpstreamRejected { status, .. } => *status,
            Error::Io(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used in logs and stage transitions.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ClientInput(_) => "client_input",
            Error::UpstreamUnavailable { timed_out: true, .. } => "upstream_timeout",
            Error::UpstreamUnavailable { .. } => "upstream_unavailable",
            Error::UpstreamContract { .. } => "upstream_contract",
            Error::UpstreamRejected { .. } => "upstream_rejected",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let details = match self {
            Error::UpstreamContract { status, body, .. } => Some(serde_json::json!({
                "upstream_status": status,
                "upstream_body": body,
            })),
            _ => None,
        };

        ErrorBody {
            error: self.to_string(),
            status: self.status_code().as_u16(),
            details,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::ClientInput(_) => tracing::debug!("Client error: {}", self),
            Error::UpstreamRejected { status, .. } => {
                tracing::warn!("Upstream rejected request (status {}): {}", status, self)
            }
            _ => tracing::error!("Relay failed ({}): {}", self.kind(), self),
        }

        (self.status_code(), Json(self.body())).into_response()
    }
}
