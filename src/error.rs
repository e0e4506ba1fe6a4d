//! Error taxonomy for the execution subsystem
//!
//! `ExecError` covers everything below the runner. The runner never lets one
//! of these escape; it folds them into an `ExecutionResult` instead.
//! `QueueError` is the only error a queue caller can observe.

use thiserror::Error;

/// Failures raised by validation and by the execution backends
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("{field} exceeds maximum length of {limit} characters ({actual})")]
    PayloadTooLarge {
        field: &'static str,
        limit: usize,
        actual: usize,
    },

    #[error("{stream} exceeded the {limit} byte output limit")]
    OutputLimitExceeded { stream: &'static str, limit: usize },

    #[error("{stream} was still held open by a background process after exit")]
    OutputDetached { stream: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote judge request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Remote judge returned an unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Polling timed out after {attempts} attempts (token {token})")]
    PollTimeout { token: String, attempts: u32 },

    #[error("Execution was cancelled")]
    Cancelled,
}

/// Rejections delivered through a queue completion channel
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue cleared")]
    Cleared,

    #[error("execution task failed: {0}")]
    InfraFailure(String),
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;
