//! Built-in transformers.

use super::Transformer;
use crate::KernelError;
use crate::args;
use crate::element::GraphElement;
use crate::graph::Graph;
use crate::query::QueryParameters;

/// Removes the listed annotation keys from every vertex and edge.
///
/// Arguments: `keys=<k1,k2,...>`.
#[derive(Debug, Default)]
pub struct StripAnnotations {
    keys: Vec<String>,
}

impl StripAnnotations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for StripAnnotations {
    fn initialize(&mut self, arguments: &str) -> Result<(), KernelError> {
        let map = args::parse_key_values(arguments)?;
        self.keys = args::require(&map, "keys")?
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        if self.keys.is_empty() {
            return Err(KernelError::InvalidArguments(
                "keys must name at least one annotation".to_string(),
            ));
        }
        Ok(())
    }

    fn put_graph(&mut self, mut graph: Graph, _query: &QueryParameters) -> Option<Graph> {
        for vertex in graph.vertices_mut().values_mut() {
            for key in &self.keys {
                vertex.remove_annotation(key);
            }
        }
        for edge in graph.edges_mut().values_mut() {
            for key in &self.keys {
                edge.edge.remove_annotation(key);
            }
        }
        Some(graph)
    }
}

/// Drops vertices labelled deeper than `depth` by a lineage query.
///
/// Arguments: `depth=<n>`.
#[derive(Debug, Default)]
pub struct MaxDepth {
    depth: i32,
}

impl MaxDepth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for MaxDepth {
    fn initialize(&mut self, arguments: &str) -> Result<(), KernelError> {
        let map = args::parse_key_values(arguments)?;
        self.depth = args::require(&map, "depth")?
            .parse()
            .map_err(|_| KernelError::InvalidArguments("depth must be a number".to_string()))?;
        if self.depth < 0 {
            return Err(KernelError::InvalidArguments(
                "depth must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn put_graph(&mut self, mut graph: Graph, query: &QueryParameters) -> Option<Graph> {
        if query.function != "getLineage" {
            return Some(graph);
        }
        let limit = self.depth;
        graph.vertices_mut().retain(|_, v| v.depth <= limit);
        Some(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Edge, Vertex};
    use crate::transformer::{TransformerChain, TransformerStage};
    use std::sync::Arc;

    fn lineage_graph() -> Graph {
        let mut graph = Graph::new();
        let mut a = Vertex::new().with("pid", "1").with("cwd", "/");
        let mut b = Vertex::new().with("pid", "2").with("cwd", "/home");
        a.depth = 0;
        b.depth = 2;
        graph
            .add_edge(Edge::new(Arc::new(a), Arc::new(b)).with("time", "10"))
            .expect("edge");
        graph
    }

    #[test]
    fn test_strip_annotations() {
        let mut t = StripAnnotations::new();
        assert!(t.initialize("keys=").is_err());
        t.initialize("keys=cwd,time").expect("init");

        let q = QueryParameters::parse("getVertices(*)").expect("parse");
        let out = t.put_graph(lineage_graph(), &q).expect("graph");
        assert!(out.vertices().all(|(_, v)| v.annotation("cwd").is_none()));
        assert!(out.edges().all(|e| e.edge.annotation("time").is_none()));
        assert_eq!(out.edge_count(), 1);
    }

    #[test]
    fn test_max_depth_prunes_and_reindexes() {
        let mut t = MaxDepth::new();
        assert!(t.initialize("depth=x").is_err());
        t.initialize("depth=1").expect("init");

        let chain = TransformerChain::new();
        chain
            .insert(
                1,
                TransformerStage {
                    name: "MaxDepth".to_string(),
                    arguments: "depth=1".to_string(),
                    transformer: Box::new(t),
                },
            )
            .expect("insert");

        let q = QueryParameters::parse("getLineage(x, 3, both)").expect("parse");
        let out = chain.iterate(lineage_graph(), &q).expect("graph");
        assert_eq!(out.vertex_count(), 1);
        assert_eq!(out.edge_count(), 0);
    }
}
