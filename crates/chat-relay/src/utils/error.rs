use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::models::chat::ErrorBody;

/// Stable diagnostic codes reported alongside every error message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MissingApiKey,
    ConnectionError,
    Timeout,
    UpstreamHttpError,
    RequestError,
    InvalidJsonReply,
    MissingContent,
    EmptyContent,
    ExtractionFailure,
    MalformedRequest,
    MissingMessage,
    Unclassified,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingApiKey => "E1000",
            ErrorCode::ConnectionError => "E1001",
            ErrorCode::Timeout => "E1002",
            ErrorCode::UpstreamHttpError => "E1003",
            ErrorCode::RequestError => "E1004",
            ErrorCode::InvalidJsonReply => "E2001",
            ErrorCode::MissingContent => "E2002",
            ErrorCode::EmptyContent => "E2003",
            ErrorCode::ExtractionFailure => "E2004",
            ErrorCode::MalformedRequest => "E3001",
            ErrorCode::MissingMessage => "E3002",
            ErrorCode::Unclassified => "E9999",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-classification of a non-success upstream status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    Authentication,
    Permission,
    RateLimited,
    Other,
}

impl UpstreamFailure {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => UpstreamFailure::Authentication,
            403 => UpstreamFailure::Permission,
            429 => UpstreamFailure::RateLimited,
            _ => UpstreamFailure::Other,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            UpstreamFailure::Authentication => "authentication failed, check the API key",
            UpstreamFailure::Permission => "permission denied for this API key",
            UpstreamFailure::RateLimited => "rate limit exceeded",
            UpstreamFailure::Other => "request rejected",
        }
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("No message provided")]
    MissingMessage,

    #[error("API key is not configured")]
    MissingApiKey,

    #[error("Could not connect to the LLM API: {0}")]
    Connection(String),

    #[error("LLM API did not answer within {:?}", .0)]
    Timeout(Duration),

    #[error("LLM API returned status {status}: {}", .kind.describe())]
    UpstreamStatus {
        status: u16,
        kind: UpstreamFailure,
        body: String,
    },

    #[error("LLM API request failed: {0}")]
    Request(String),

    #[error("LLM API returned invalid JSON: {0}")]
    InvalidJson(String),

    #[error("LLM API reply has no content field")]
    MissingContent,

    #[error("LLM API reply has empty content")]
    EmptyContent,

    #[error("Could not extract reply text from LLM API response")]
    Extraction,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::MalformedRequest(_) => ErrorCode::MalformedRequest,
            RelayError::MissingMessage => ErrorCode::MissingMessage,
            RelayError::MissingApiKey => ErrorCode::MissingApiKey,
            RelayError::Connection(_) => ErrorCode::ConnectionError,
            RelayError::Timeout(_) => ErrorCode::Timeout,
            RelayError::UpstreamStatus { .. } => ErrorCode::UpstreamHttpError,
            RelayError::Request(_) => ErrorCode::RequestError,
            RelayError::InvalidJson(_) => ErrorCode::InvalidJsonReply,
            RelayError::MissingContent => ErrorCode::MissingContent,
            RelayError::EmptyContent => ErrorCode::EmptyContent,
            RelayError::Extraction => ErrorCode::ExtractionFailure,
            RelayError::Internal(_) => ErrorCode::Unclassified,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MalformedRequest(_) | RelayError::MissingMessage => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the client. Unclassified details stay in the log.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Internal(_) => "An unexpected server error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError::MalformedRequest(rejection.body_text())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = self.status();

        match &self {
            RelayError::MalformedRequest(_) | RelayError::MissingMessage => {
                tracing::warn!(code = %code, "Bad request: {}", self);
            }
            RelayError::UpstreamStatus { status: upstream, body, .. } => {
                tracing::error!(
                    code = %code,
                    upstream_status = *upstream,
                    upstream_body = %body,
                    "{}",
                    self
                );
            }
            _ => {
                tracing::error!(code = %code, "{}", self);
            }
        }

        let body = Json(ErrorBody {
            error: self.client_message(),
            code: code.as_str().to_string(),
        });

        (status, body).into_response()
    }
}
