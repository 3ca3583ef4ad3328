//! # Storages
//!
//! Pluggable sinks at the end of the filter chain. The kernel wraps each
//! one in a [`StorageRecord`] carrying its lifecycle and commit counters.
//!
//! Built-ins:
//! - [`MemoryStorage`]: commits into the shared result graph read by the
//!   built-in query engine.
//! - [`RedbStorage`]: persistent storage on redb, staged commits written
//!   in one transaction per flush.

mod memory;
mod redb_store;

pub use memory::{MemoryStorage, SharedGraph};
pub use redb_store::RedbStorage;

use crate::KernelError;
use crate::element::{Edge, Vertex};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A provenance sink.
pub trait Storage: Send {
    /// Parse arguments and open resources. An `Err` rejects the storage.
    fn initialize(&mut self, arguments: &str) -> Result<(), KernelError>;

    fn commit_vertex(&mut self, vertex: &Vertex) -> Result<(), KernelError>;

    fn commit_edge(&mut self, edge: &Edge) -> Result<(), KernelError>;

    /// Make staged commits durable. Called from the dispatch thread only.
    fn flush_transactions(&mut self) -> Result<(), KernelError> {
        Ok(())
    }

    /// Flush and release resources.
    fn shutdown(&mut self) -> bool;
}

/// Lifecycle of a registered storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    MarkedForRemoval,
    Removed,
}

/// Counters reported when a storage is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitCounts {
    pub vertices: u64,
    pub edges: u64,
}

/// A registered storage and its bookkeeping.
pub struct StorageRecord {
    pub id: u64,
    pub name: String,
    pub arguments: String,
    lifecycle: Lifecycle,
    counts: CommitCounts,
    storage: Box<dyn Storage>,
}

impl std::fmt::Debug for StorageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("lifecycle", &self.lifecycle)
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl StorageRecord {
    #[must_use]
    pub fn new(id: u64, name: &str, arguments: &str, storage: Box<dyn Storage>) -> Self {
        Self {
            id,
            name: name.to_string(),
            arguments: arguments.to_string(),
            lifecycle: Lifecycle::Active,
            counts: CommitCounts::default(),
            storage,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    pub fn counts(&self) -> CommitCounts {
        self.counts
    }

    /// Stop receiving commits; the dispatch loop reaps it next iteration.
    pub fn mark_for_removal(&mut self) {
        if self.lifecycle == Lifecycle::Active {
            self.lifecycle = Lifecycle::MarkedForRemoval;
        }
    }

    pub fn commit_vertex(&mut self, vertex: &Vertex) {
        match self.storage.commit_vertex(vertex) {
            Ok(()) => self.counts.vertices = self.counts.vertices.saturating_add(1),
            Err(e) => tracing::warn!(storage = %self.name, error = %e, "vertex commit failed"),
        }
    }

    pub fn commit_edge(&mut self, edge: &Edge) {
        match self.storage.commit_edge(edge) {
            Ok(()) => self.counts.edges = self.counts.edges.saturating_add(1),
            Err(e) => tracing::warn!(storage = %self.name, error = %e, "edge commit failed"),
        }
    }

    /// Flush staged commits. A panicking backend is logged, not propagated.
    pub fn flush(&mut self) {
        let storage = &mut self.storage;
        match catch_unwind(AssertUnwindSafe(|| storage.flush_transactions())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(storage = %self.name, error = %e, "flush failed"),
            Err(_) => tracing::error!(storage = %self.name, "storage panicked during flush"),
        }
    }

    /// Shut the storage down and freeze its counters.
    ///
    /// The record ends up `Removed` even if the backend panics.
    pub fn shutdown(&mut self) -> CommitCounts {
        let storage = &mut self.storage;
        match catch_unwind(AssertUnwindSafe(|| storage.shutdown())) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(storage = %self.name, "storage reported an unclean shutdown");
            }
            Err(_) => tracing::error!(storage = %self.name, "storage panicked during shutdown"),
        }
        self.lifecycle = Lifecycle::Removed;
        self.counts
    }
}

// =============================================================================
// TESTS
// =============================================================================
