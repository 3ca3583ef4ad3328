//! # Kernel Errors
//!
//! Every fallible kernel operation returns `Result<T, KernelError>`.
//! Control commands never surface these to the transport: they are
//! rendered into the command's output text instead.

use thiserror::Error;

/// Errors that can occur in the provenance kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// No factory is registered under this kind/name pair.
    #[error("Unable to find/load class: {kind} {name}")]
    UnknownComponent { kind: String, name: String },

    /// A component rejected its arguments in `initialize`/`launch`.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Arguments could not be parsed.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Missing, malformed or out-of-range insert position.
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// Out-of-range or non-numeric index on removal.
    #[error("Bad index: {0}")]
    BadIndex(String),

    /// No registered component of this kind carries this name.
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// A removal did not complete within the configured timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The element cannot be buffered (edge without both endpoints).
    #[error("Invalid element: {0}")]
    InvalidElement(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File or socket I/O error.
    #[error("IO error: {0}")]
    Io(String),

    /// The query could not be executed.
    #[error("Query error: {0}")]
    Query(String),
}

impl From<std::io::Error> for KernelError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<postcard::Error> for KernelError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
