use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;
use wirestream_core::error::CoreError;

#[derive(Error, Debug, Clone)]
pub enum AppErrorKind {
    #[error("{0}")]
    CoreError(#[from] CoreError),
    #[error("I/O error from Tokio")]
    IoError,
    #[error("Configuration error")]
    ConfigError,
}

#[derive(Error, Clone)]
pub struct AppError {
    pub error_kind: AppErrorKind,
    pub message: String,
}

impl Debug for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.error_kind {
            AppErrorKind::CoreError(e) => write!(f, "AppError -> {}", e),
            _ => write!(f, "AppError: {}: {}", self.error_kind, self.message),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.error_kind {
            AppErrorKind::CoreError(e) => write!(f, "AppError -> {}", e),
            _ => write!(f, "AppError: {}: {}", self.error_kind, self.message),
        }
    }
}

impl AppError {
    pub fn new(error_kind: AppErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(value: CoreError) -> Self {
        Self::new(AppErrorKind::CoreError(value), "")
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::new(AppErrorKind::IoError, value.to_string().as_str())
    }
}

impl From<dotenvy::Error> for AppError {
    fn from(value: dotenvy::Error) -> Self {
        Self::new(AppErrorKind::ConfigError, value.to_string().as_str())
    }
}
