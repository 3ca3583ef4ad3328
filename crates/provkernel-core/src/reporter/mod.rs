//! # Reporters
//!
//! Producers that push vertices and edges into their own [`Buffer`] from a
//! thread they own. The kernel only launches, polls and shuts them down;
//! what they read is their business.

mod json_lines;

pub use json_lines::JsonLinesReporter;

use crate::KernelError;
use crate::buffer::Buffer;
use std::sync::Arc;

/// A provenance producer.
pub trait Reporter: Send {
    /// Start producing into `buffer`. Must return promptly; an `Err`
    /// rejects the reporter and nothing is registered.
    fn launch(&mut self, arguments: &str, buffer: Arc<Buffer>) -> Result<(), KernelError>;

    /// Stop producing. Elements already buffered are still drained.
    fn shutdown(&mut self) -> bool;

    fn is_running(&self) -> bool;
}

/// A registered reporter and its buffer.
pub struct ReporterEntry {
    pub id: u64,
    pub name: String,
    pub arguments: String,
    pub buffer: Arc<Buffer>,
    pub reporter: Box<dyn Reporter>,
    /// Set by `remove reporter`; the dispatch loop drops the entry once
    /// the buffer runs dry.
    pub pending_removal: bool,
}

impl std::fmt::Debug for ReporterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReporterEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("buffered", &self.buffer.len())
            .field("pending_removal", &self.pending_removal)
            .finish_non_exhaustive()
    }
}
