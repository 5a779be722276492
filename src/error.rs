//! Unified error type for the reactor, timer, pool, and connection pipeline.

use std::fmt;

/// Result alias used throughout `corehttp`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors recognized by the core (spec.md §7).
///
/// Programmer errors — a Buffer/Timer/Pool invariant violation — are never
/// represented here; those are `assert!`/`debug_assert!` panics, not
/// recoverable `Result` values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure on a socket, file, or mmap operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request parser rejected the input. Carries the HTTP status code
    /// a parse failure surfaces as (400 or 413).
    #[error("parse error: {status} {detail}")]
    Parse { status: u16, detail: String },

    /// `stat`/`open`/`mmap` failed while building a response in a way the
    /// 404/403 substitution path can't recover from either.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// The worker pool's task queue rejected a submission under the
    /// configured backpressure policy.
    #[error("worker pool saturated")]
    PoolSaturated,

    /// The SQL pool is exhausted or was asked to release an unknown handle.
    #[error("sql pool error: {0}")]
    SqlPool(String),

    /// Config file failed to parse or load.
    #[error("config error: {0}")]
    Config(String),

    /// Everything else, carrying a human-readable message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn parse(status: u16, detail: impl Into<String>) -> Self {
        Error::Parse { status, detail: detail.into() }
    }

    pub fn filesystem(detail: impl fmt::Display) -> Self {
        Error::Filesystem(detail.to_string())
    }

    pub fn config(detail: impl fmt::Display) -> Self {
        Error::Config(detail.to_string())
    }

    pub fn sql_pool(detail: impl fmt::Display) -> Self {
        Error::SqlPool(detail.to_string())
    }

    pub fn other(detail: impl fmt::Display) -> Self {
        Error::Other(detail.to_string())
    }

    /// The HTTP status this error should surface as, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Parse { status, .. } => Some(*status),
            _ => None,
        }
    }
}
