//! Error types for pilot-ai

use thiserror::Error;

/// Result type alias using pilot-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when interacting with LLM providers
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication failed (401/403); never retried
    #[error("authentication error (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    /// Non-retryable API error (4xx other than 401/403/429)
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// Rate limit retries exhausted
    #[error("rate limited (HTTP 429) after {retries} retries: {body}")]
    RateLimited { retries: u32, body: String },

    /// Server error retries exhausted
    #[error("server error (HTTP {status}) after {retries} retries: {body}")]
    Server {
        status: u16,
        retries: u32,
        body: String,
    },

    /// Transport retries exhausted
    #[error("http request failed after {retries} retries: {source}")]
    Transport {
        retries: u32,
        #[source]
        source: reqwest::Error,
    },

    /// Request was cancelled
    #[error("request cancelled")]
    Cancelled,

    /// Cancelled while waiting out a retry backoff. Preserves the last HTTP
    /// status and attempt number; unwraps to the cancellation cause.
    #[error("retry cancelled at attempt {attempt} (last HTTP status: {status:?})")]
    RetryCancelled {
        attempt: u32,
        status: Option<u16>,
        #[source]
        source: Box<Error>,
    },

    /// Streaming error
    #[error("stream error: {0}")]
    Stream(String),

    /// Unexpected response format
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid or missing API key
    #[error("invalid or missing API key")]
    InvalidApiKey,
}

impl Error {
    /// Whether this error is (or wraps) a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::RetryCancelled { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Auth { status, .. }
            | Error::Api { status, .. }
            | Error::Server { status, .. } => Some(*status),
            Error::RateLimited { .. } => Some(429),
            Error::RetryCancelled { status, .. } => *status,
            _ => None,
        }
    }
}
