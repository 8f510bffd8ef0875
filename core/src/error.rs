//! Domain error types. Each subsystem gets a small `thiserror` enum; callers
//! convert into `anyhow::Error` with `?` and the HTTP layer converts into
//! `AppError` at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("job record {0} has an unrecognized status value: {1}")]
    InvalidStatus(String, String),

    #[error("queue payload for job {0} could not be decoded: {1}")]
    InvalidPayload(String, serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("No audio track found in input")]
    NoAudioTrack,

    #[error("failed to probe input: {0}")]
    ProbeFailed(String),

    #[error("transcode failed (exit code {exit_code:?}): see {log_path}")]
    TranscodeFailed {
        exit_code: Option<i32>,
        log_path: String,
    },

    #[error("transcoder produced no output, or an empty file")]
    InvalidOutput,

    #[error("transcode was cancelled")]
    Cancelled,

    #[error("failed to spawn transcoder process: {0}")]
    Spawn(#[from] std::io::Error),
}

impl TranscodeError {
    /// Whether the task runner should retry this failure (bounded, with
    /// backoff) rather than fail the job immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranscodeError::ProbeFailed(_) | TranscodeError::TranscodeFailed { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("destination URL failed the safety check: {0}")]
    UnsafeUrl(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upload rejected with status {0}")]
    BadStatus(reqwest::StatusCode),

    #[error("failed to read artifact from disk: {0}")]
    Io(#[from] std::io::Error),
}
