//! Error types for the harness core

use thiserror::Error;

/// Result type alias using the harness Error
pub type Result<T> = std::result::Result<T, Error>;

/// Harness error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Session bootstrap error: {0}")]
    Session(String),

    /// Non-2xx API response that is not a retryable 429.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The 429 backoff loop hit its attempt cap without a non-429 response.
    #[error("rate limit not lifted after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    /// A job reached a terminal state carrying an error message.
    #[error("job failed: {0}")]
    Job(String),

    /// A job reached a terminal state other than `complete`, with no message.
    #[error("job finished with status {0:?}")]
    JobStatus(String),

    /// A read returned an empty collection where at least one item was required.
    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("poll timed out after {waited_ms}ms")]
    PollTimeout { waited_ms: u64 },

    #[error("upload error: {0}")]
    Upload(String),
}

impl Error {
    /// True for the terminal-state job errors (`Job` and `JobStatus`).
    pub fn is_job_failure(&self) -> bool {
        matches!(self, Error::Job(_) | Error::JobStatus(_))
    }
}
