//! Error types shared by every layer of the crate.

use crate::graph::Address;

/// Everything that can go wrong while building, evaluating or persisting cells.
///
/// Variants fall into four families: lookups that found nothing, user
/// computations that failed, caller configuration mistakes, and failures of
/// an external collaborator (store, codec). None of them is retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // ---- lookup ----
    #[error("Not found: {0}")]
    NotFound(String),

    // ---- computation ----
    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Output mismatch: expected {expected} outputs, got {got}")]
    OutputMismatch { expected: usize, got: String },

    #[error("Nested cell {0} has no result")]
    Unevaluated(String),

    // ---- configuration ----
    #[error("Primary key field `{field}` missing from arguments")]
    MissingKey { field: String },

    #[error("Primary key field `{field}` must be plain data")]
    InvalidKey { field: String },

    #[error("Dependency cycle reachable from {0}")]
    Cycle(String),

    #[error("Edge from {0} to itself")]
    SelfEdge(String),

    #[error("Cell {0} wraps an async function; use evaluate_async")]
    AsyncInSyncContext(String),

    #[error("Cell {0} has neither a function nor a result")]
    NoFunction(String),

    #[error("Invalid period expression `{0}`")]
    InvalidPeriod(String),

    // ---- collaborators ----
    #[error("Store error: {0}")]
    Store(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Convenience constructor for user functions reporting a failure.
    pub fn computation(message: impl Into<String>) -> Self {
        Error::Computation(message.into())
    }

    pub(crate) fn not_found(address: &Address) -> Self {
        Error::NotFound(address.to_string())
    }

    /// True for errors caused by the caller's setup rather than by data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingKey { .. }
                | Error::InvalidKey { .. }
                | Error::Cycle(_)
                | Error::SelfEdge(_)
                | Error::AsyncInSyncContext(_)
                | Error::NoFunction(_)
                | Error::InvalidPeriod(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
