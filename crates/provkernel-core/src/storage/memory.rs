//! In-memory storage backed by a [`SharedGraph`].

use super::Storage;
use crate::KernelError;
use crate::element::{Edge, Vertex};
use crate::graph::Graph;
use parking_lot::RwLock;
use std::sync::Arc;

/// Graph shared between memory storages and the built-in query engine.
pub type SharedGraph = Arc<RwLock<Graph>>;

/// Commits every element into the shared graph.
#[derive(Debug)]
pub struct MemoryStorage {
    graph: SharedGraph,
}

impl MemoryStorage {
    #[must_use]
    pub fn new(graph: SharedGraph) -> Self {
        Self { graph }
    }
}

impl Storage for MemoryStorage {
    fn initialize(&mut self, arguments: &str) -> Result<(), KernelError> {
        if !arguments.trim().is_empty() {
            return Err(KernelError::InvalidArguments(format!(
                "Memory storage takes no arguments, got '{}'",
                arguments.trim()
            )));
        }
        Ok(())
    }

    fn commit_vertex(&mut self, vertex: &Vertex) -> Result<(), KernelError> {
        self.graph.write().add_vertex(vertex.clone());
        Ok(())
    }

    fn commit_edge(&mut self, edge: &Edge) -> Result<(), KernelError> {
        self.graph.write().add_edge(edge.clone()).map(|_| ())
    }

    fn shutdown(&mut self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commits_land_in_shared_graph() {
        let shared = SharedGraph::default();
        let mut storage = MemoryStorage::new(Arc::clone(&shared));
        storage.initialize("").expect("init");

        let a = Arc::new(Vertex::new().with("pid", "1"));
        let b = Arc::new(Vertex::new().with("pid", "2"));
        storage.commit_vertex(&a).expect("vertex");
        storage
            .commit_edge(&Edge::new(Arc::clone(&b), Arc::clone(&a)))
            .expect("edge");

        let graph = shared.read();
        assert_eq!(graph.vertex_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_rejects_arguments() {
        let mut storage = MemoryStorage::new(SharedGraph::default());
        assert!(storage.initialize("path=/tmp/x").is_err());
    }
}
