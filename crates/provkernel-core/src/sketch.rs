//! # Sketches
//!
//! Summarizers updated by the terminal filter alongside every storage
//! commit. The kernel only sees the update hooks and an opaque JSON
//! summary that the remote-summary server exchanges with peers.

use crate::element::{Edge, GraphElement, Vertex};
use serde_json::json;
use std::collections::BTreeMap;

/// An auxiliary summary structure.
pub trait Sketch: Send {
    fn put_vertex(&mut self, vertex: &Vertex);

    fn put_edge(&mut self, edge: &Edge);

    /// Current summary, exchanged with remote kernels.
    fn summary(&self) -> serde_json::Value;
}

/// A registered sketch.
pub struct SketchEntry {
    pub name: String,
    pub sketch: Box<dyn Sketch>,
}

impl std::fmt::Debug for SketchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SketchEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// COUNTER
// =============================================================================

/// Counts committed vertices and edges per `type` annotation.
#[derive(Debug, Default)]
pub struct CounterSketch {
    vertices: BTreeMap<String, u64>,
    edges: BTreeMap<String, u64>,
}

impl CounterSketch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn bump(counts: &mut BTreeMap<String, u64>, type_name: Option<&str>) {
    let slot = counts
        .entry(type_name.unwrap_or("<untyped>").to_string())
        .or_insert(0);
    *slot = slot.saturating_add(1);
}

impl Sketch for CounterSketch {
    fn put_vertex(&mut self, vertex: &Vertex) {
        bump(&mut self.vertices, vertex.type_name());
    }

    fn put_edge(&mut self, edge: &Edge) {
        bump(&mut self.edges, edge.type_name());
    }

    fn summary(&self) -> serde_json::Value {
        json!({
            "vertices": self.vertices,
            "edges": self.edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_groups_by_type() {
        let mut sketch = CounterSketch::new();
        sketch.put_vertex(&Vertex::new().with("type", "Process"));
        sketch.put_vertex(&Vertex::new().with("type", "Process"));
        sketch.put_vertex(&Vertex::new());
        sketch.put_edge(&Edge::detached().with("type", "Used"));

        let summary = sketch.summary();
        assert_eq!(summary["vertices"]["Process"], 2);
        assert_eq!(summary["vertices"]["<untyped>"], 1);
        assert_eq!(summary["edges"]["Used"], 1);
    }
}
