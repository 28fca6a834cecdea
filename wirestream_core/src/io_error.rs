use crate::connection::Connection;
use crate::error::CoreError;
use std::fmt::{Display, Formatter};

/// A transport failure observed by one of the stream loops.
///
/// `connection` is the handle the loop was using when it failed, which is not
/// necessarily the stream's current connection anymore.
#[derive(Debug, Clone)]
pub struct IoError {
    pub connection: Connection,
    pub cause: CoreError,
}

impl IoError {
    pub fn new(connection: Connection, cause: CoreError) -> Self {
        Self { connection, cause }
    }
}

impl Display for IoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.cause, self.connection)
    }
}

impl std::error::Error for IoError {}

pub type ErrorCallback = Box<dyn Fn(IoError) + Send + Sync>;
