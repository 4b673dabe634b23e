use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::http_client::{HttpResponse, TransportError};

/// Message surfaced to callers when the backend rate limits them
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please wait a moment and try again.";

/// Message surfaced to callers on any 5xx response
pub const SERVER_ERROR_MESSAGE: &str = "Server error, please try again later.";

/// Type alias for client results
pub type ApiResult<T> = Result<T, ApiError>;

/// Reasons a session refresh can fail.
///
/// Every request queued behind an in-flight refresh receives a clone of the
/// same failure, so this type is `Clone` and carries no borrowed sources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token is stored")]
    MissingRefreshToken,

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Refresh endpoint rejected the session with status {status}")]
    Rejected { status: u16, body: String },

    #[error("Refresh response was malformed: {0}")]
    InvalidResponse(String),

    #[error("Refresh did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Failed to persist refreshed tokens: {0}")]
    Storage(String),

    #[error("Refresh was abandoned before it settled")]
    Abandoned,
}

/// Errors returned by [`crate::ApiClient`]
#[derive(Error, Debug)]
pub enum ApiError {
    /// 429 from the backend. Not retried automatically.
    #[error("{}", RATE_LIMITED_MESSAGE)]
    RateLimited { response: HttpResponse },

    /// Any 5xx from the backend. Not retried automatically.
    #[error("{}", SERVER_ERROR_MESSAGE)]
    Server { response: HttpResponse },

    /// Any other non-2xx response, passed through unchanged
    #[error("Request failed with status {}", .response.status())]
    Status { response: HttpResponse },

    /// The access token was rejected and the session could not be refreshed
    #[error("Session expired: {0}")]
    SessionExpired(#[from] RefreshError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Token storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl ApiError {
    /// Status code of the response behind this error, if there was one
    pub fn status(&self) -> Option<u16> {
        self.response().map(HttpResponse::status)
    }

    /// The original response, for callers that want to inspect the body
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::RateLimited { response }
            | Self::Server { response }
            | Self::Status { response } => Some(response),
            _ => None,
        }
    }

    /// Classify the error for caller-side handling
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Status { response } => match response.status() {
                401 => ErrorCategory::Authentication,
                403 => ErrorCategory::Permission,
                404 => ErrorCategory::NotFound,
                _ => ErrorCategory::Client,
            },
            Self::SessionExpired(_) => ErrorCategory::Authentication,
            Self::Transport(_) => ErrorCategory::Network,
            Self::Encode(_) | Self::Decode(_) | Self::InvalidResponse(_) => {
                ErrorCategory::Validation
            }
            Self::Storage(_) => ErrorCategory::Internal,
        }
    }

    /// Whether a manual retry by the caller could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Error categories used to pick a handling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection failures and timeouts
    Network,
    /// Rejected or expired credentials
    Authentication,
    /// Backend rate limiting
    RateLimit,
    /// 5xx responses
    Server,
    /// Access denied for the current user
    Permission,
    /// Resource does not exist
    NotFound,
    /// Other 4xx responses
    Client,
    /// Bodies that could not be encoded or decoded
    Validation,
    /// Failures inside the client itself
    Internal,
}

impl ErrorCategory {
    /// Returns true if errors in this category are worth retrying later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network | Self::RateLimit | Self::Server => true,

            Self::Authentication
            | Self::Permission
            | Self::NotFound
            | Self::Client
            | Self::Validation
            | Self::Internal => false,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Network => "Network",
            ErrorCategory::Authentication => "Authentication",
            ErrorCategory::RateLimit => "RateLimit",
            ErrorCategory::Server => "Server",
            ErrorCategory::Permission => "Permission",
            ErrorCategory::NotFound => "NotFound",
            ErrorCategory::Client => "Client",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Internal => "Internal",
        };
        write!(f, "{}", name)
    }
}
