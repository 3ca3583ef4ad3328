//! # Transformer Chain
//!
//! Ordered stages applied to a query's result graph before it is returned.
//! The chain has its own lock, separate from the filter chain, since it
//! never touches the ingest stream.

mod builtin;

pub use builtin::{MaxDepth, StripAnnotations};

use crate::KernelError;
use crate::graph::Graph;
use crate::query::QueryParameters;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A query-time graph rewrite.
pub trait Transformer: Send {
    /// Parse arguments. An `Err` rejects the transformer.
    fn initialize(&mut self, arguments: &str) -> Result<(), KernelError> {
        let _ = arguments;
        Ok(())
    }

    /// Rewrite `graph`. Returning `None` ends the chain with no result.
    fn put_graph(&mut self, graph: Graph, query: &QueryParameters) -> Option<Graph>;

    fn shutdown(&mut self) -> bool {
        true
    }
}

/// A registered transformer with the name and arguments it was added with.
pub struct TransformerStage {
    pub name: String,
    pub arguments: String,
    pub transformer: Box<dyn Transformer>,
}

impl std::fmt::Debug for TransformerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerStage")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

/// Ordered transformers behind one lock. Positions are 1-based.
#[derive(Debug, Default)]
pub struct TransformerChain {
    stages: Mutex<Vec<TransformerStage>>,
}

impl TransformerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.lock().is_empty()
    }

    /// Insert at 1-based `position` in `1..=len + 1`.
    pub fn insert(&self, position: usize, stage: TransformerStage) -> Result<(), TransformerStage> {
        let mut stages = self.stages.lock();
        if position == 0 || position > stages.len() + 1 {
            return Err(stage);
        }
        stages.insert(position - 1, stage);
        Ok(())
    }

    /// Remove the transformer at 1-based `index`. The caller shuts it down.
    pub fn remove(&self, index: usize) -> Option<TransformerStage> {
        let mut stages = self.stages.lock();
        if index == 0 || index > stages.len() {
            return None;
        }
        Some(stages.remove(index - 1))
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.stages
            .lock()
            .iter()
            .map(|s| (s.name.clone(), s.arguments.clone()))
            .collect()
    }

    pub fn drain(&self) -> Vec<TransformerStage> {
        std::mem::take(&mut *self.stages.lock())
    }

    /// Apply every transformer in order, re-indexing after each one.
    ///
    /// Stops at the first transformer that returns `None` or panics.
    pub fn iterate(&self, graph: Graph, query: &QueryParameters) -> Option<Graph> {
        let mut stages = self.stages.lock();
        let mut current = graph;
        for stage in stages.iter_mut() {
            let transformer = &mut stage.transformer;
            let result = catch_unwind(AssertUnwindSafe(|| transformer.put_graph(current, query)));
            match result {
                Ok(Some(mut next)) => {
                    next.commit_index();
                    current = next;
                }
                Ok(None) => {
                    tracing::debug!(transformer = %stage.name, "transformer returned no graph");
                    return None;
                }
                Err(_) => {
                    tracing::error!(transformer = %stage.name, "transformer panicked");
                    return None;
                }
            }
        }
        Some(current)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Vertex;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    /// Records that it ran, then passes the graph on.
    struct Recorder(Arc<PlMutex<Vec<&'static str>>>, &'static str);

    impl Transformer for Recorder {
        fn put_graph(&mut self, graph: Graph, _query: &QueryParameters) -> Option<Graph> {
            self.0.lock().push(self.1);
            Some(graph)
        }
    }

    struct Void;

    impl Transformer for Void {
        fn put_graph(&mut self, _graph: Graph, _query: &QueryParameters) -> Option<Graph> {
            None
        }
    }

    fn stage(name: &str, transformer: Box<dyn Transformer>) -> TransformerStage {
        TransformerStage {
            name: name.to_string(),
            arguments: String::new(),
            transformer,
        }
    }

    fn query() -> QueryParameters {
        QueryParameters::parse("getVertices(*)").expect("parse")
    }

    #[test]
    fn test_runs_in_index_order() {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let chain = TransformerChain::new();
        chain
            .insert(1, stage("B", Box::new(Recorder(Arc::clone(&log), "b"))))
            .expect("insert");
        chain
            .insert(1, stage("A", Box::new(Recorder(Arc::clone(&log), "a"))))
            .expect("insert");

        let mut graph = Graph::new();
        graph.add_vertex(Vertex::new().with("pid", "1"));
        let out = chain.iterate(graph, &query()).expect("graph");
        assert_eq!(out.vertex_count(), 1);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_none_stops_the_chain() {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let chain = TransformerChain::new();
        chain.insert(1, stage("Void", Box::new(Void))).expect("insert");
        chain
            .insert(2, stage("Recorder", Box::new(Recorder(Arc::clone(&log), "after"))))
            .expect("insert");

        assert!(chain.iterate(Graph::new(), &query()).is_none());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_empty_chain_passes_graph_through() {
        let chain = TransformerChain::new();
        assert!(chain.iterate(Graph::new(), &query()).is_some());
    }

    #[test]
    fn test_remove_bounds() {
        let chain = TransformerChain::new();
        chain.insert(1, stage("Void", Box::new(Void))).expect("insert");
        assert!(chain.insert(3, stage("Void", Box::new(Void))).is_err());
        assert!(chain.remove(0).is_none());
        assert!(chain.remove(2).is_none());
        assert!(chain.remove(1).is_some());
        assert!(chain.is_empty());
    }
}
