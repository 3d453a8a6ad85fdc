//! Error types for the storage client.
//!
//! # Design
//! Validation failures (`InvalidUrl`, `InvalidContainerName`,
//! `InvalidObjectName`, `CdnNotEnabled`, ...) are raised before any network
//! activity. Every non-2xx response that survives the retry policy lands in
//! `Response` with the status, reason phrase and the full response so callers
//! can inspect headers or body. `NoSuchContainer` and friends are the
//! container/object layer's reading of specific statuses.

use thiserror::Error;

use crate::http::HttpResponse;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Failure reported by a [`Transport`](crate::transport::Transport) when no
/// response was obtained at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors returned by the storage client.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The URL could not be parsed or uses an unsupported scheme or host.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The authentication service rejected the credentials (401).
    #[error("authentication failed: credentials were rejected")]
    AuthenticationFailed,

    /// The authentication service answered 2xx without a token or storage URL.
    #[error("authentication error: {0}")]
    AuthenticationError(String),

    /// The server returned a non-2xx status after the retry policy ran out.
    #[error("HTTP {status}: {reason}")]
    Response {
        status: u16,
        reason: String,
        response: Box<HttpResponse>,
    },

    /// A CDN operation was attempted but the account has no CDN URL.
    #[error("CDN is not enabled for this account")]
    CdnNotEnabled,

    #[error("invalid container name: {0:?}")]
    InvalidContainerName(String),

    #[error("invalid object name: {0:?}")]
    InvalidObjectName(String),

    #[error("metadata name exceeds {limit} bytes: {name:?}")]
    InvalidMetaName { name: String, limit: usize },

    #[error("metadata value for {name:?} exceeds {limit} bytes")]
    InvalidMetaValue { name: String, limit: usize },

    #[error("container {0:?} does not exist")]
    NoSuchContainer(String),

    #[error("object {0:?} does not exist")]
    NoSuchObject(String),

    #[error("container {0:?} already exists")]
    ContainerExists(String),

    #[error("container {0:?} is not empty")]
    ContainerNotEmpty(String),

    #[error("container {0:?} is not published to the CDN")]
    ContainerNotPublic(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A listing body could not be deserialized.
    #[error("deserialization failed: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// No response could be obtained, even after the single resend.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Wrap a non-2xx response, deriving the reason from the status code.
    pub fn from_response(response: HttpResponse) -> Self {
        StorageError::Response {
            status: response.status,
            reason: reason_phrase(response.status),
            response: Box::new(response),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::Response { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Canonical reason phrase for a status code, or `"Unknown"`.
pub fn reason_phrase(status: u16) -> String {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_error_carries_status_and_reason() {
        let err = StorageError::from_response(HttpResponse {
            status: 404,
            headers: Vec::new(),
            body: b"gone".to_vec(),
        });
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404: Not Found");
        match err {
            StorageError::Response { response, .. } => assert_eq!(response.body, b"gone"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_status_has_fallback_reason() {
        assert_eq!(reason_phrase(599), "Unknown");
    }

    #[test]
    fn validation_errors_have_no_status() {
        assert_eq!(StorageError::CdnNotEnabled.status(), None);
        assert_eq!(
            StorageError::InvalidContainerName("a/b".into()).status(),
            None
        );
    }
}
