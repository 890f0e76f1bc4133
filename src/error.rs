//! Error handling and custom error types
//!
//! Provides unified error handling across the client using thiserror.
//! Batch-level failures surface as [`Error`]; per-image failures are captured
//! on the [`ImageRecord`](crate::record::ImageRecord) instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("The API was already requested. Use a new client or reset it first")]
    AlreadyRequested,

    #[error("The API was not requested yet")]
    NotRequestedYet,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error ({code}): {message}")]
    Transport { code: String, message: String },

    #[error("Task and subtask must be given together or not at all")]
    InvalidTaskPair,

    #[error("Archive response did not contain a url")]
    MissingArchiveUrl,

    /// Per-record only; carries the source and is stored on the record.
    #[error("source unavailable")]
    RecordUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transport {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let code = if e.is_timeout() {
            "timeout".to_string()
        } else if e.is_connect() {
            "connect".to_string()
        } else if e.is_redirect() {
            "redirect".to_string()
        } else if let Some(status) = e.status() {
            format!("status {}", status.as_u16())
        } else if e.is_body() {
            "body".to_string()
        } else if e.is_decode() {
            "decode".to_string()
        } else {
            "request".to_string()
        };

        Error::Transport {
            code,
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
