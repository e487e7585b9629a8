#![forbid(unsafe_code)]

//! Error returned by task callbacks.

use std::error::Error;
use std::fmt;

/// A task callback failed.
///
/// The scheduler drops the failing task, makes sure another host callback is
/// requested if work remains, and then hands the error back to whoever drove
/// the flush.
#[derive(Debug)]
pub struct TaskError {
    message: String,
    source: Option<Box<dyn Error + 'static>>,
}

impl TaskError {
    /// Create an error with a message and no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error.
    pub fn from_source(message: impl Into<String>, source: impl Error + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "task failed: {}: {source}", self.message),
            None => write!(f, "task failed: {}", self.message),
        }
    }
}

impl Error for TaskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref()
    }
}

/// Result type produced by task callbacks.
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source() {
        let io = std::io::Error::other("disk gone");
        let err = TaskError::from_source("flush", io);
        assert_eq!(err.to_string(), "task failed: flush: disk gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn display_without_source() {
        let err = TaskError::new("boom");
        assert_eq!(err.to_string(), "task failed: boom");
        assert_eq!(err.message(), "boom");
    }
}
