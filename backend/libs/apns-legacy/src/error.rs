use std::io;

use thiserror::Error;

/// Error type for APNs operations
///
/// Configuration problems are never retried. I/O failures keep their original
/// `io::Error` (kind and message) so callers can match on them directly.
#[derive(Error, Debug)]
pub enum ApnsError {
    #[error("APNs configuration error: {0}")]
    Config(String),

    #[error("Invalid device token: {0}")]
    InvalidDeviceToken(String),

    #[error("Notification payload of {0} bytes does not fit the frame length field")]
    PayloadTooLarge(usize),

    #[error("Failed to encode notification payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ApnsError {
    pub fn config(msg: impl Into<String>) -> Self {
        ApnsError::Config(msg.into())
    }

    /// True for errors that must not be retried because they come from setup
    /// rather than the network.
    pub fn is_config(&self) -> bool {
        matches!(self, ApnsError::Config(_))
    }

    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ApnsError::Io(err) => Some(err.kind()),
            _ => None,
        }
    }
}

pub type ApnsResult<T> = Result<T, ApnsError>;
