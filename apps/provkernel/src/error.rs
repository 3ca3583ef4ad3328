//! # Application Errors

use provkernel_core::KernelError;
use thiserror::Error;

/// Errors raised by configuration loading, TLS setup and the servers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<rustls::Error> for ServerError {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}
