//! Error types for armthrottle.

use std::time::Duration;

use thiserror::Error;

use crate::ratelimit::{Operation, RateLimitKey, Service};

/// Main error type for admission and configuration.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// The requested token count can never be granted by the bucket.
    ///
    /// This is a rate table misconfiguration and is not retryable.
    #[error("burst too low: {service} {operation} requested {requested} tokens but burst is {burst}")]
    BurstExceeded {
        service: Service,
        operation: Operation,
        requested: u32,
        burst: u32,
    },

    /// The key's backlog is so deep that the wait cannot be scheduled.
    #[error("wait for {key} cannot be scheduled: backlog out of range")]
    Unschedulable { key: RateLimitKey },

    /// The caller cancelled the wait.
    #[error("wait for {key} cancelled")]
    Cancelled { key: RateLimitKey },

    /// Admission would complete after the caller's deadline.
    #[error("wait for {key} of {delay:?} would exceed deadline")]
    DeadlineExceeded { key: RateLimitKey, delay: Duration },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The background sweep was requested outside a tokio runtime.
    #[error("registry sweep requires a running tokio runtime")]
    NoRuntime,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for armthrottle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
