use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by upstream services (RAG service, LLM providers,
/// embedding backends)
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Could not reach the service
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Request timed out
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Service answered with a non-success status
    #[error("API error: {status} - {body}")]
    Status { status: u16, body: String },

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Credentials were rejected (HTTP 401/403)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Response was well-formed but empty
    #[error("No content in response")]
    NoContent,

    /// Any other transport failure
    #[error("HTTP error: {0}")]
    Http(String),
}

impl UpstreamError {
    /// Check if this error is retryable.
    ///
    /// Returns `true` for transient errors that might succeed on retry:
    /// - Timeouts and connection failures
    /// - Rate limits
    /// - 5xx responses
    ///
    /// # Example
    ///
    /// ```
    /// use rag_eval_core::UpstreamError;
    ///
    /// assert!(UpstreamError::Timeout(300_000).is_retryable());
    /// assert!(!UpstreamError::NoContent.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout(_)
            | UpstreamError::Connection(_)
            | UpstreamError::RateLimit { .. } => true,
            UpstreamError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get the server-provided retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map a transport error from reqwest.
    pub fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            UpstreamError::Timeout(timeout.as_millis() as u64)
        } else if error.is_connect() {
            UpstreamError::Connection(error.to_string())
        } else if error.is_decode() {
            UpstreamError::InvalidResponse(error.to_string())
        } else {
            UpstreamError::Http(error.to_string())
        }
    }

    /// Map a non-success HTTP status.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => UpstreamError::RateLimit {
                message: body,
                retry_after,
            },
            401 | 403 => UpstreamError::Auth(format!("{} - {}", status, body)),
            _ => UpstreamError::Status { status, body },
        }
    }
}

/// Errors resolving provider credentials or building clients
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Required environment variables are not set
    #[error("{vars} environment variable(s) required for {provider} provider")]
    MissingEnv { provider: String, vars: String },

    /// Token file does not exist
    #[error("Token file not found: {0}")]
    TokenFileNotFound(PathBuf),

    /// Token file exists but could not be read
    #[error("Error reading token file {path}: {error}")]
    TokenFile { path: PathBuf, error: String },

    /// HTTP client could not be constructed
    #[error("Failed to setup HTTP client: {0}")]
    Client(String),
}
