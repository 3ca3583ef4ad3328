//! # Queries
//!
//! Query lines have the form `function(arg1, arg2, ...)`. The kernel parses
//! them into [`QueryParameters`], hands them to a [`QueryEngine`], then runs
//! the result through the transformer chain.
//!
//! [`MemoryQueryEngine`] answers queries over the graph that memory
//! storages commit into:
//!
//! - `getVertices(<key>=<value>)` or `getVertices(*)`
//! - `getEdges(<child key>, <parent key>)`
//! - `getLineage(<vertex key>, <depth>, ancestors|descendants|both)`

use crate::KernelError;
use crate::element::GraphElement;
use crate::graph::Graph;
use crate::storage::SharedGraph;
use std::collections::{BTreeSet, VecDeque};

/// Usage text returned when a query produces no graph.
pub const QUERY_HELP: &str = "Available queries:
\tgetVertices(<key>=<value>|*)
\tgetEdges(<child vertex key>, <parent vertex key>)
\tgetLineage(<vertex key>, <depth>, ancestors|descendants|both)
\texit";

/// A parsed query line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameters {
    pub function: String,
    pub arguments: Vec<String>,
    /// The line as received.
    pub raw: String,
}

impl QueryParameters {
    /// Parse `function(arg, ...)`. Arguments are trimmed; quotes around an
    /// argument are removed.
    pub fn parse(line: &str) -> Result<Self, KernelError> {
        let raw = line.trim();
        let (function, rest) = raw
            .split_once('(')
            .ok_or_else(|| KernelError::Query(format!("expected function(...), got '{}'", raw)))?;
        let inner = rest
            .strip_suffix(')')
            .ok_or_else(|| KernelError::Query("missing closing ')'".to_string()))?;

        let function = function.trim();
        if function.is_empty() || !function.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(KernelError::Query(format!(
                "invalid function name '{}'",
                function
            )));
        }

        let arguments = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|a| a.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
                .collect()
        };

        Ok(Self {
            function: function.to_string(),
            arguments,
            raw: raw.to_string(),
        })
    }

    pub fn argument(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).map(String::as_str)
    }
}

/// Executes parsed queries against committed provenance.
pub trait QueryEngine: Send + Sync {
    /// `Ok(None)` means the query is not understood by this engine.
    fn execute(&self, query: &QueryParameters) -> Result<Option<Graph>, KernelError>;
}

// =============================================================================
// MEMORY QUERY ENGINE
// =============================================================================

/// Lineage direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ancestors,
    Descendants,
    Both,
}

impl std::str::FromStr for Direction {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ancestors" | "a" => Ok(Self::Ancestors),
            "descendants" | "d" => Ok(Self::Descendants),
            "both" | "b" => Ok(Self::Both),
            other => Err(KernelError::Query(format!("unknown direction '{}'", other))),
        }
    }
}

/// Query engine over the memory storages' shared graph.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueryEngine {
    graph: SharedGraph,
}

impl MemoryQueryEngine {
    #[must_use]
    pub fn new(graph: SharedGraph) -> Self {
        Self { graph }
    }

    fn vertices(&self, query: &QueryParameters) -> Result<Graph, KernelError> {
        let expression = query
            .argument(0)
            .ok_or_else(|| KernelError::Query("getVertices needs an expression".to_string()))?;
        let graph = self.graph.read();

        let keys: BTreeSet<String> = if expression == "*" {
            graph.vertices().map(|(k, _)| k.clone()).collect()
        } else {
            let (key, value) = expression
                .split_once('=')
                .ok_or_else(|| KernelError::Query(format!("expected key=value, got '{}'", expression)))?;
            let (key, value) = (key.trim(), value.trim());
            graph
                .vertices()
                .filter(|(_, v)| v.annotation(key) == Some(value))
                .map(|(k, _)| k.clone())
                .collect()
        };

        let mut out = Graph::new();
        for key in keys {
            if let Some(v) = graph.vertex(&key) {
                out.vertices_mut().insert(key, v.clone());
            }
        }
        Ok(out)
    }

    fn edges(&self, query: &QueryParameters) -> Result<Graph, KernelError> {
        let (Some(child), Some(parent)) = (query.argument(0), query.argument(1)) else {
            return Err(KernelError::Query(
                "getEdges needs a child and a parent key".to_string(),
            ));
        };
        let graph = self.graph.read();
        let keys: BTreeSet<String> = [child.to_string(), parent.to_string()]
            .into_iter()
            .collect();
        let mut out = graph.subgraph(&keys);
        out.edges_mut()
            .retain(|_, e| e.child == child && e.parent == parent);
        out.commit_index();
        Ok(out)
    }

    fn lineage(&self, query: &QueryParameters) -> Result<Graph, KernelError> {
        let start = query
            .argument(0)
            .ok_or_else(|| KernelError::Query("getLineage needs a vertex key".to_string()))?;
        let max_depth: i32 = query
            .argument(1)
            .ok_or_else(|| KernelError::Query("getLineage needs a depth".to_string()))?
            .parse()
            .map_err(|_| KernelError::Query("depth must be a number".to_string()))?;
        let direction: Direction = query
            .argument(2)
            .ok_or_else(|| KernelError::Query("getLineage needs a direction".to_string()))?
            .parse()?;

        let graph = self.graph.read();
        if graph.vertex(start).is_none() {
            return Ok(Graph::new());
        }

        let mut depths = std::collections::BTreeMap::new();
        let mut queue = VecDeque::new();
        depths.insert(start.to_string(), 0i32);
        queue.push_back((start.to_string(), 0i32));

        while let Some((key, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let mut neighbors = Vec::new();
            if direction != Direction::Descendants {
                neighbors.extend(graph.outgoing(&key).map(|e| e.parent.clone()));
            }
            if direction != Direction::Ancestors {
                neighbors.extend(graph.incoming(&key).map(|e| e.child.clone()));
            }
            for next in neighbors {
                if !depths.contains_key(&next) {
                    depths.insert(next.clone(), depth + 1);
                    queue.push_back((next, depth + 1));
                }
            }
        }

        let keys: BTreeSet<String> = depths.keys().cloned().collect();
        let mut out = graph.subgraph(&keys);
        for (key, vertex) in out.vertices_mut().iter_mut() {
            vertex.depth = depths.get(key).copied().unwrap_or_default();
        }
        Ok(out)
    }
}

impl QueryEngine for MemoryQueryEngine {
    fn execute(&self, query: &QueryParameters) -> Result<Option<Graph>, KernelError> {
        match query.function.as_str() {
            "getVertices" => self.vertices(query).map(Some),
            "getEdges" => self.edges(query).map(Some),
            "getLineage" => self.lineage(query).map(Some),
            _ => Ok(None),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
