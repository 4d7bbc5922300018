//! Request-level failures of a relay operation.
//!
//! Line-level anomalies never reach this type; they are logged and skipped
//! inside the relay loop. Only conditions that end the whole operation are
//! represented here.

use actix_web::HttpResponse;
use http::StatusCode;
use thiserror::Error;

/// Number of body characters kept when reporting an unparsable upstream body.
pub const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum RelayError {
    /// Upstream answered with a status other than 200.
    #[error("upstream returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    /// Upstream answered 200 but sent no body bytes.
    #[error("Empty response from API")]
    EmptyResponse,

    /// Buffered mode produced no text and the raw body was not a JSON object.
    #[error("Invalid JSON response from API: {snippet}")]
    InvalidResponse { snippet: String },

    /// Connection, DNS, timeout or read failure before the first byte.
    #[error("relay failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Build an `InvalidResponse` from the offending body, truncated for diagnostics.
    pub fn invalid_body(body: &str) -> Self {
        Self::InvalidResponse {
            snippet: body.chars().take(BODY_SNIPPET_CHARS).collect(),
        }
    }

    /// HTTP status surfaced to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::EmptyResponse | Self::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl actix_web::ResponseError for RelayError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(RelayError::status_code(self).as_u16())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        // Upstream rejections carry the upstream's own body text as the message.
        let message = match self {
            Self::Upstream { body, .. } => body.clone(),
            other => other.to_string(),
        };
        crate::util::error_response(RelayError::status_code(self), &message)
    }
}
