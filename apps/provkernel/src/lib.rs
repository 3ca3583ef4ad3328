//! # Provkernel Daemon Library
//!
//! Network surface around [`provkernel_core::Kernel`]: configuration, TLS,
//! the four line-protocol servers and a matching client.

pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod tls;

pub use client::Client;
pub use config::KernelConfig;
pub use error::ServerError;
pub use server::{Listener, ServerContext, Service};
