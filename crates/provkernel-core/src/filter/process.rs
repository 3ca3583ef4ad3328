//! # Process Filter
//!
//! Keeps only the provenance reachable from "relevant" processes.
//!
//! A process vertex (`type=Process`) is relevant when its `key` annotation
//! satisfies `op value`. Relevance then spreads along edges:
//!
//! - `WasTriggeredBy` (child = new process, parent = old process): the new
//!   process becomes relevant if the old one is relevant or matches.
//! - `WasGeneratedBy` (child = artifact, parent = process) and `Used`
//!   (child = process, parent = artifact): forwarded when the process is
//!   relevant or matches. Skipped entirely in skeleton mode.
//!
//! Vertices are never forwarded on their own. Each endpoint is forwarded
//! once, just before the first edge that admits it.
//!
//! Arguments: `key=<k> op=<op> value=<v> [skeleton=<bool>] [strip=<bool>]`,
//! with `op` one of `= != < <= > >= ~` (`~` is a full regex match).

use super::{Downstream, Filter};
use crate::KernelError;
use crate::args;
use crate::element::{Edge, GraphElement, Vertex};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

const PROCESS: &str = "Process";
const WAS_TRIGGERED_BY: &str = "WasTriggeredBy";
const WAS_GENERATED_BY: &str = "WasGeneratedBy";
const USED: &str = "Used";

/// Annotations dropped from process vertices when `strip` is on.
const PROCESS_STRIP_KEYS: [&str; 4] = ["cwd", "gid", "egid", "euid"];
/// Annotations dropped from artifact vertices when `strip` is on.
const ARTIFACT_STRIP_KEYS: [&str; 3] = ["version", "epoch", "permissions"];

/// Comparison applied to the annotation value.
#[derive(Debug, Clone)]
enum Op {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Regex(Regex),
}

impl Op {
    fn parse(op: &str, value: &str) -> Result<Self, KernelError> {
        Ok(match op {
            "=" => Self::Equal,
            "!=" => Self::NotEqual,
            "<" => Self::Less,
            "<=" => Self::LessEqual,
            ">" => Self::Greater,
            ">=" => Self::GreaterEqual,
            "~" => Self::Regex(
                Regex::new(&format!("^(?:{})$", value))
                    .map_err(|e| KernelError::InvalidArguments(e.to_string()))?,
            ),
            other => {
                return Err(KernelError::InvalidArguments(format!(
                    "unknown op '{}'",
                    other
                )));
            }
        })
    }

    /// `actual` is the vertex's value; `None` when the key is absent.
    fn matches(&self, actual: Option<&str>, expected: &str) -> bool {
        match self {
            Self::Equal => match actual {
                Some(a) => a == expected,
                None => expected == "null",
            },
            Self::NotEqual => match actual {
                Some(a) => a != expected,
                None => expected != "null",
            },
            Self::Regex(re) => actual.is_some_and(|a| re.is_match(a)),
            Self::Less | Self::LessEqual | Self::Greater | Self::GreaterEqual => {
                let (Some(a), Ok(b)) = (actual, expected.trim().parse::<f64>()) else {
                    return false;
                };
                let Ok(a) = a.trim().parse::<f64>() else {
                    return false;
                };
                match self {
                    Self::Less => a < b,
                    Self::LessEqual => a <= b,
                    Self::Greater => a > b,
                    _ => a >= b,
                }
            }
        }
    }
}

/// Streaming filter that keeps provenance around matching processes.
#[derive(Debug, Default)]
pub struct ProcessFilter {
    key: String,
    value: String,
    op: Option<Op>,
    skeleton: bool,
    strip: bool,
    relevant: BTreeSet<String>,
    forwarded: BTreeSet<String>,
}

impl ProcessFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_process(vertex: &Vertex) -> bool {
        vertex.type_name() == Some(PROCESS)
    }

    fn is_match(&self, vertex: &Vertex) -> bool {
        Self::is_process(vertex)
            && self
                .op
                .as_ref()
                .is_some_and(|op| op.matches(vertex.annotation(&self.key), &self.value))
    }

    fn strip(&self, vertex: &Vertex) -> Vertex {
        let mut out = vertex.clone();
        if self.strip {
            let keys: &[&str] = if Self::is_process(vertex) {
                &PROCESS_STRIP_KEYS
            } else {
                &ARTIFACT_STRIP_KEYS
            };
            for key in keys {
                out.remove_annotation(key);
            }
        }
        out
    }

    /// Forward both endpoints (first time only) and then the edge.
    fn forward(&mut self, edge: Edge, next: &mut Downstream<'_>) {
        let Some((child, parent)) = edge.endpoints() else {
            return;
        };
        let child = self.strip(child);
        let parent = self.strip(parent);

        for vertex in [&parent, &child] {
            if self.forwarded.insert(vertex.content_hash()) {
                next.put_vertex(vertex.clone());
            }
        }

        let mut edge = edge;
        if self.strip {
            edge.set_child(Arc::new(child));
            edge.set_parent(Arc::new(parent));
        }
        next.put_edge(edge);
    }

    fn triggered_by(&mut self, new_process: &Vertex, old_process: &Vertex) -> bool {
        let new_hash = new_process.content_hash();
        let old_hash = old_process.content_hash();

        if self.is_match(old_process) {
            self.relevant.insert(old_hash);
            self.relevant.insert(new_hash);
            true
        } else if self.is_match(new_process) || self.relevant.contains(&old_hash) {
            self.relevant.insert(new_hash);
            true
        } else {
            self.relevant.contains(&new_hash)
        }
    }

    fn touches_relevant(&mut self, process: &Vertex) -> bool {
        let hash = process.content_hash();
        if self.relevant.contains(&hash) {
            true
        } else if self.is_match(process) {
            self.relevant.insert(hash);
            true
        } else {
            false
        }
    }
}

impl Filter for ProcessFilter {
    fn initialize(&mut self, arguments: &str) -> Result<(), KernelError> {
        let map = args::parse_key_values(arguments)?;
        let non_empty = |key: &str| -> Result<String, KernelError> {
            let value = args::require(&map, key)?.trim();
            if value.is_empty() {
                return Err(KernelError::InvalidArguments(format!(
                    "empty value for '{}'",
                    key
                )));
            }
            Ok(value.to_string())
        };

        let key = non_empty("key")?;
        let value = non_empty("value")?;
        let op = Op::parse(&non_empty("op")?, &value)?;
        let skeleton = map
            .get("skeleton")
            .map(|s| args::parse_bool(s))
            .transpose()?
            .unwrap_or(false);
        let strip = map
            .get("strip")
            .map(|s| args::parse_bool(s))
            .transpose()?
            .unwrap_or(false);

        self.key = key;
        self.value = value;
        self.op = Some(op);
        self.skeleton = skeleton;
        self.strip = strip;
        Ok(())
    }

    fn put_vertex(&mut self, _vertex: Vertex, _next: &mut Downstream<'_>) {}

    fn put_edge(&mut self, edge: Edge, next: &mut Downstream<'_>) {
        let Some((child, parent)) = edge.endpoints() else {
            return;
        };
        let admit = match edge.type_name() {
            Some(WAS_TRIGGERED_BY) => self.triggered_by(child, parent),
            Some(WAS_GENERATED_BY) if !self.skeleton => self.touches_relevant(parent),
            Some(USED) if !self.skeleton => self.touches_relevant(child),
            _ => false,
        };
        if admit {
            self.forward(edge, next);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
