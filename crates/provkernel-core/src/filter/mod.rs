//! # Filter Chain
//!
//! An ordered sequence of user filters followed by the fixed [`Terminal`].
//!
//! Filters do not hold successor links. A filter receives a [`Downstream`]
//! handle for "the rest of the chain after me" and forwards through it, so
//! inserting or removing a filter is a plain `Vec` splice under the chain
//! lock. Traversal holds the same lock, so no traversal ever observes a
//! half-spliced chain.
//!
//! ## Positions
//!
//! Positions are 1-based. A new filter may be inserted at `1..=len + 1`
//! (pushing the previous occupant later); an existing one removed at
//! `1..=len`. The terminal is not addressable.

mod process;

pub use process::ProcessFilter;

use crate::KernelError;
use crate::element::{Edge, Element, Vertex};
use crate::sketch::SketchEntry;
use crate::storage::StorageRecord;
use parking_lot::Mutex;

/// A streaming pipeline stage.
pub trait Filter: Send {
    /// Parse arguments. An `Err` rejects the filter and nothing is registered.
    fn initialize(&mut self, arguments: &str) -> Result<(), KernelError> {
        let _ = arguments;
        Ok(())
    }

    /// Process a vertex, forwarding zero or more elements to `next`.
    fn put_vertex(&mut self, vertex: Vertex, next: &mut Downstream<'_>);

    /// Process an edge, forwarding zero or more elements to `next`.
    fn put_edge(&mut self, edge: Edge, next: &mut Downstream<'_>);

    fn shutdown(&mut self) -> bool {
        true
    }
}

/// A registered filter with the name and arguments it was added with.
pub struct FilterStage {
    pub name: String,
    pub arguments: String,
    pub filter: Box<dyn Filter>,
}

impl std::fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStage")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// DOWNSTREAM
// =============================================================================

/// The remainder of the chain after the current filter.
pub struct Downstream<'a> {
    rest: &'a mut [FilterStage],
    terminal: &'a Terminal,
}

impl Downstream<'_> {
    pub fn put_vertex(&mut self, vertex: Vertex) {
        match self.rest.split_first_mut() {
            Some((stage, rest)) => {
                let mut next = Downstream {
                    rest,
                    terminal: self.terminal,
                };
                stage.filter.put_vertex(vertex, &mut next);
            }
            None => self.terminal.put_vertex(&vertex),
        }
    }

    pub fn put_edge(&mut self, edge: Edge) {
        match self.rest.split_first_mut() {
            Some((stage, rest)) => {
                let mut next = Downstream {
                    rest,
                    terminal: self.terminal,
                };
                stage.filter.put_edge(edge, &mut next);
            }
            None => self.terminal.put_edge(&edge),
        }
    }

    pub fn put(&mut self, element: Element) {
        match element {
            Element::Vertex(v) => self.put_vertex(v),
            Element::Edge(e) => self.put_edge(e),
        }
    }
}

// =============================================================================
// TERMINAL
// =============================================================================

/// Fixed last node: fans every element out to active storages, then sketches.
///
/// Lock order is storages before sketches, both taken after the chain lock.
#[derive(Debug, Default)]
pub struct Terminal {
    storages: Mutex<Vec<StorageRecord>>,
    sketches: Mutex<Vec<SketchEntry>>,
}

impl Terminal {
    pub fn storages(&self) -> &Mutex<Vec<StorageRecord>> {
        &self.storages
    }

    pub fn sketches(&self) -> &Mutex<Vec<SketchEntry>> {
        &self.sketches
    }

    fn put_vertex(&self, vertex: &Vertex) {
        for record in self.storages.lock().iter_mut().filter(|r| r.is_active()) {
            record.commit_vertex(vertex);
        }
        for entry in self.sketches.lock().iter_mut() {
            entry.sketch.put_vertex(vertex);
        }
    }

    fn put_edge(&self, edge: &Edge) {
        for record in self.storages.lock().iter_mut().filter(|r| r.is_active()) {
            record.commit_edge(edge);
        }
        for entry in self.sketches.lock().iter_mut() {
            entry.sketch.put_edge(edge);
        }
    }
}

// =============================================================================
// FILTER CHAIN
// =============================================================================

/// User filters plus the terminal, guarded by one lock.
#[derive(Debug, Default)]
pub struct FilterChain {
    stages: Mutex<Vec<FilterStage>>,
    terminal: Terminal,
}

impl FilterChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    /// Feed one element into the head of the chain.
    pub fn put(&self, element: Element) {
        let mut stages = self.stages.lock();
        let mut head = Downstream {
            rest: stages.as_mut_slice(),
            terminal: &self.terminal,
        };
        head.put(element);
    }

    /// Number of user filters.
    pub fn len(&self) -> usize {
        self.stages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.lock().is_empty()
    }

    /// Splice `stage` in at 1-based `position`.
    pub fn insert(&self, position: usize, stage: FilterStage) -> Result<(), FilterStage> {
        let mut stages = self.stages.lock();
        if position == 0 || position > stages.len() + 1 {
            return Err(stage);
        }
        stages.insert(position - 1, stage);
        Ok(())
    }

    /// Splice out the filter at 1-based `index`. The caller shuts it down.
    pub fn remove(&self, index: usize) -> Option<FilterStage> {
        let mut stages = self.stages.lock();
        if index == 0 || index > stages.len() {
            return None;
        }
        Some(stages.remove(index - 1))
    }

    /// `(name, arguments)` of each user filter in chain order.
    pub fn list(&self) -> Vec<(String, String)> {
        self.stages
            .lock()
            .iter()
            .map(|s| (s.name.clone(), s.arguments.clone()))
            .collect()
    }

    /// Remove and return every user filter.
    pub fn drain(&self) -> Vec<FilterStage> {
        std::mem::take(&mut *self.stages.lock())
    }
}

// =============================================================================
// TESTS
// =============================================================================
