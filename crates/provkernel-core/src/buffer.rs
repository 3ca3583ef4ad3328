//! # Reporter Buffer
//!
//! One FIFO queue per reporter. The reporter's thread appends, the
//! dispatch loop drains. Callers never lock externally.

use crate::KernelError;
use crate::element::Element;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Result of [`Buffer::get_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled {
    /// The oldest pending element.
    Element(Element),
    /// Nothing queued right now. Not an end-of-stream signal.
    Drained,
}

/// Producer-side queue of pending graph elements.
#[derive(Debug, Default)]
pub struct Buffer {
    queue: Mutex<VecDeque<Element>>,
}

impl Buffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element. Edges must carry both endpoints.
    pub fn put(&self, element: impl Into<Element>) -> Result<(), KernelError> {
        let element = element.into();
        if let Element::Edge(edge) = &element {
            if edge.endpoints().is_none() {
                return Err(KernelError::InvalidElement(
                    "edge is missing an endpoint".to_string(),
                ));
            }
        }
        self.queue.lock().push_back(element);
        Ok(())
    }

    /// Pop the oldest element, or [`Polled::Drained`] when empty.
    pub fn get_next(&self) -> Polled {
        match self.queue.lock().pop_front() {
            Some(element) => Polled::Element(element),
            None => Polled::Drained,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
