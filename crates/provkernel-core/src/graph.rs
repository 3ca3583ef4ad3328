//! # Result Graph
//!
//! The graph returned by queries and handed through the transformer chain.
//! The memory storage also uses it as its backing store.
//!
//! Vertices are keyed by the content hash they had when inserted. Edges
//! refer to their endpoints by those keys, so transformers may rewrite
//! annotations without breaking connectivity. Transformers that edit the
//! vertex or edge collections directly leave the adjacency index stale
//! until [`Graph::commit_index`] runs.

use crate::KernelError;
use crate::element::{Edge, GraphElement, Vertex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// An edge stored in a [`Graph`], with endpoint keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: String,
    pub child: String,
    pub parent: String,
    pub edge: Edge,
}

/// A materialized provenance graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "GraphWire", try_from = "GraphWire")]
pub struct Graph {
    vertices: BTreeMap<String, Vertex>,
    edges: BTreeMap<String, GraphEdge>,
    /// vertex key -> keys of edges where it is the child
    outgoing: BTreeMap<String, BTreeSet<String>>,
    /// vertex key -> keys of edges where it is the parent
    incoming: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vertex under its content hash. Returns its key.
    pub fn add_vertex(&mut self, vertex: Vertex) -> String {
        let key = vertex.content_hash();
        self.vertices.entry(key.clone()).or_insert(vertex);
        key
    }

    /// Insert an edge and both of its endpoints.
    pub fn add_edge(&mut self, edge: Edge) -> Result<String, KernelError> {
        let (child, parent) = match edge.endpoints() {
            Some((c, p)) => (c.clone(), p.clone()),
            None => {
                return Err(KernelError::InvalidElement(
                    "edge is missing an endpoint".to_string(),
                ));
            }
        };
        let child = self.add_vertex(child);
        let parent = self.add_vertex(parent);
        Ok(self.link(child, parent, edge))
    }

    fn link(&mut self, child: String, parent: String, edge: Edge) -> String {
        let id = format!("{}:{}:{}", child, parent, edge.content_hash());
        self.outgoing
            .entry(child.clone())
            .or_default()
            .insert(id.clone());
        self.incoming
            .entry(parent.clone())
            .or_default()
            .insert(id.clone());
        self.edges.entry(id.clone()).or_insert(GraphEdge {
            id: id.clone(),
            child,
            parent,
            edge,
        });
        id
    }

    pub fn vertex(&self, key: &str) -> Option<&Vertex> {
        self.vertices.get(key)
    }

    pub fn vertices(&self) -> impl Iterator<Item = (&String, &Vertex)> {
        self.vertices.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values()
    }

    /// Direct access for transformers. Call [`commit_index`](Self::commit_index) afterwards.
    pub fn vertices_mut(&mut self) -> &mut BTreeMap<String, Vertex> {
        &mut self.vertices
    }

    /// Direct access for transformers. Call [`commit_index`](Self::commit_index) afterwards.
    pub fn edges_mut(&mut self) -> &mut BTreeMap<String, GraphEdge> {
        &mut self.edges
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty()
    }

    /// Edges whose child is `key` (towards ancestors).
    pub fn outgoing(&self, key: &str) -> impl Iterator<Item = &GraphEdge> {
        self.outgoing
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
    }

    /// Edges whose parent is `key` (towards descendants).
    pub fn incoming(&self, key: &str) -> impl Iterator<Item = &GraphEdge> {
        self.incoming
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
    }

    /// Rebuild the adjacency index, dropping edges whose endpoints are gone.
    pub fn commit_index(&mut self) {
        let vertices = &self.vertices;
        self.edges
            .retain(|_, e| vertices.contains_key(&e.child) && vertices.contains_key(&e.parent));

        self.outgoing.clear();
        self.incoming.clear();
        for (id, edge) in &self.edges {
            self.outgoing
                .entry(edge.child.clone())
                .or_default()
                .insert(id.clone());
            self.incoming
                .entry(edge.parent.clone())
                .or_default()
                .insert(id.clone());
        }
    }

    /// Copy the vertices in `keys` and every edge between them.
    pub fn subgraph(&self, keys: &BTreeSet<String>) -> Self {
        let mut out = Self::new();
        for key in keys {
            if let Some(v) = self.vertices.get(key) {
                out.vertices.insert(key.clone(), v.clone());
            }
        }
        for edge in self.edges.values() {
            if keys.contains(&edge.child) && keys.contains(&edge.parent) {
                out.edges.insert(edge.id.clone(), edge.clone());
            }
        }
        out.commit_index();
        out
    }
}

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VertexWire {
    key: String,
    annotations: BTreeMap<String, String>,
    #[serde(default)]
    depth: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeWire {
    child: String,
    parent: String,
    annotations: BTreeMap<String, String>,
    #[serde(default)]
    depth: i32,
}

/// Serialized form: flat vertex and edge lists, edges referencing vertex keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphWire {
    vertices: Vec<VertexWire>,
    edges: Vec<EdgeWire>,
}

impl From<Graph> for GraphWire {
    fn from(graph: Graph) -> Self {
        let vertices = graph
            .vertices
            .into_iter()
            .map(|(key, v)| VertexWire {
                key,
                depth: v.depth,
                annotations: v.annotations().clone(),
            })
            .collect();
        let edges = graph
            .edges
            .into_values()
            .map(|e| EdgeWire {
                child: e.child,
                parent: e.parent,
                depth: e.edge.depth,
                annotations: e.edge.annotations().clone(),
            })
            .collect();
        Self { vertices, edges }
    }
}

impl TryFrom<GraphWire> for Graph {
    type Error = KernelError;

    fn try_from(wire: GraphWire) -> Result<Self, Self::Error> {
        let mut graph = Graph::new();
        let mut handles: BTreeMap<String, Arc<Vertex>> = BTreeMap::new();

        for vw in wire.vertices {
            let mut vertex = Vertex::new();
            vertex.add_annotations(&vw.annotations);
            if vertex.content_hash() != vw.key {
                vertex = Vertex::with_fixed_hash(vw.key.clone());
                vertex.add_annotations(&vw.annotations);
            }
            vertex.depth = vw.depth;
            handles.insert(vw.key.clone(), Arc::new(vertex.clone()));
            graph.vertices.insert(vw.key, vertex);
        }

        for ew in wire.edges {
            let child = handles.get(&ew.child).cloned().ok_or_else(|| {
                KernelError::Serialization(format!("edge child {} not in graph", ew.child))
            })?;
            let parent = handles.get(&ew.parent).cloned().ok_or_else(|| {
                KernelError::Serialization(format!("edge parent {} not in graph", ew.parent))
            })?;
            let mut edge = Edge::new(child, parent);
            edge.add_annotations(&ew.annotations);
            edge.depth = ew.depth;
            graph.link(ew.child, ew.parent, edge);
        }

        Ok(graph)
    }
}

// =============================================================================
// TESTS
// =============================================================================
