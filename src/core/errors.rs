// src/core/errors.rs

//! Defines the primary error type for the entire wrapper.

use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing all failures observable through the
/// wrapper. Using `thiserror` allows for clean error definitions and automatic
/// `From` trait implementations.
///
/// The three failover outcomes (`FailoverSuccess`, `FailoverFailed`,
/// `TransactionResolutionUnknown`) are deliberately errors: the application
/// must be told that its in-flight call did not complete on the original
/// physical connection, even when the logical connection has already been
/// repaired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WrapperError {
    /// An error raised by the underlying driver, with the SQLSTATE when the
    /// server supplied one. Classification into network/access kinds is the
    /// dialect's job.
    #[error("Driver error: {message}")]
    Driver {
        message: String,
        sqlstate: Option<String>,
    },

    /// A connectivity-level failure (refused, reset, timed out mid-stream).
    #[error("Network error: {0}")]
    Network(String),

    /// Authentication rejected by the server.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Credentials could not be obtained or applied before connecting.
    #[error("Login failed: {0}")]
    Login(String),

    /// Failover completed and the logical connection now points at a healthy
    /// host; the interrupted call must be retried by the application.
    #[error(
        "The active database connection has changed due to a connection failure. \
         Any in-progress transaction was rolled back; repeat the last operation."
    )]
    FailoverSuccess,

    /// Failover could not produce a usable connection within the budget.
    #[error("Unable to establish a connection to a suitable host: {0}")]
    FailoverFailed(String),

    /// The writer was lost inside a user-observable transaction; the wrapper
    /// cannot know whether the doomed transaction committed.
    #[error(
        "Transaction resolution unknown. The connection failed inside a transaction; \
         re-establishment succeeded but the outcome of the transaction is unknowable."
    )]
    TransactionResolutionUnknown,

    /// The per-operation budget (`wrapper_query_timeout` /
    /// `wrapper_connect_timeout`) was exhausted.
    #[error("Internal query timeout after {0:?}")]
    InternalQueryTimeout(Duration),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Unsupported host selection strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// No host matching the requested role is currently available.
    #[error("No hosts available: {0}")]
    UnavailableHost(String),

    /// The operation is not legal in the connection's current state
    /// (e.g. switching read-only inside an open transaction).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WrapperError {
    /// True for the three typed failover outcomes.
    pub fn is_failover_error(&self) -> bool {
        matches!(
            self,
            WrapperError::FailoverSuccess
                | WrapperError::FailoverFailed(_)
                | WrapperError::TransactionResolutionUnknown
        )
    }

    /// The SQLSTATE attached to a driver error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            WrapperError::Driver { sqlstate, .. } => sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Convenience constructor for driver errors without a SQLSTATE.
    pub fn driver(message: impl Into<String>) -> Self {
        WrapperError::Driver {
            message: message.into(),
            sqlstate: None,
        }
    }

    /// Convenience constructor for driver errors carrying a SQLSTATE.
    pub fn driver_with_state(message: impl Into<String>, sqlstate: impl Into<String>) -> Self {
        WrapperError::Driver {
            message: message.into(),
            sqlstate: Some(sqlstate.into()),
        }
    }
}

impl From<std::io::Error> for WrapperError {
    fn from(e: std::io::Error) -> Self {
        WrapperError::Network(e.to_string())
    }
}

impl From<url::ParseError> for WrapperError {
    fn from(e: url::ParseError) -> Self {
        WrapperError::IllegalArgument(format!("invalid URL: {e}"))
    }
}

impl From<serde_json::Error> for WrapperError {
    fn from(e: serde_json::Error) -> Self {
        WrapperError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for WrapperError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        WrapperError::InternalQueryTimeout(Duration::ZERO)
    }
}
