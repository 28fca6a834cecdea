use std::error::Error;
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreErrorKind {
    #[error("Malformed length prefix")]
    MalformedLength,
    #[error("Incomplete packet")]
    IncompletePacket,
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("I/O error: {0}")]
    IoError(std::io::ErrorKind),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Stream closed")]
    StreamClosed,
    #[error("Invalid arguments")]
    ArgumentError,
    #[error("tokio task error")]
    TaskError,
    #[error("Timeout Error")]
    TimeoutError,
}

#[derive(Debug, Clone)]
pub struct CoreError {
    pub error_kind: CoreErrorKind,
    pub message: String,
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Core Error: {}: {}", self.error_kind, self.message)
    }
}

impl Error for CoreError {}

impl CoreError {
    pub fn new(error_kind: CoreErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(value: std::io::Error) -> Self {
        Self::new(CoreErrorKind::IoError(value.kind()), value.to_string().as_str())
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(CoreErrorKind::TaskError, value.to_string().as_str())
    }
}

impl From<tokio::time::error::Elapsed> for CoreError {
    fn from(value: tokio::time::error::Elapsed) -> Self {
        Self::new(CoreErrorKind::TimeoutError, value.to_string().as_str())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CoreError {
    fn from(value: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::new(CoreErrorKind::StreamClosed, value.to_string().as_str())
    }
}
