//! # Graph Elements
//!
//! Vertices and edges are annotation maps with two separate identities:
//!
//! - **Container identity** (`PartialEq`/`Hash`): the annotation map's
//!   contents, so elements can be used as set and map keys.
//! - **Content hash**: the fixed hash when one was supplied, otherwise a
//!   BLAKE3 digest of the canonical annotation string. Used for
//!   cross-process addressing and storage keys.
//!
//! The two are never required to agree. A vertex carrying a fixed hash
//! (a *reference* vertex) may share annotations with a vertex that hashes
//! differently, and code keyed by content hash must not assume otherwise.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Reserved annotation key holding the element's type.
pub const TYPE_KEY: &str = "type";

// =============================================================================
// GRAPH ELEMENT TRAIT
// =============================================================================

/// Shared annotation behaviour of [`Vertex`] and [`Edge`].
pub trait GraphElement {
    /// Prefix mixed into the canonical string so a vertex and an edge with
    /// identical annotations do not collide.
    const KIND: &'static str;

    fn annotations(&self) -> &BTreeMap<String, String>;

    fn annotations_mut(&mut self) -> &mut BTreeMap<String, String>;

    fn fixed_hash(&self) -> Option<&str>;

    /// Add one annotation. Empty keys are ignored; a missing value is
    /// stored as the empty string.
    fn add_annotation(&mut self, key: &str, value: Option<&str>) {
        if key.is_empty() {
            return;
        }
        self.annotations_mut()
            .insert(key.to_string(), value.unwrap_or_default().to_string());
    }

    /// Add every pair, with the same normalization as [`add_annotation`](Self::add_annotation).
    fn add_annotations<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            self.add_annotation(key.as_ref(), Some(value.as_ref()));
        }
    }

    /// Remove an annotation, returning its previous value.
    fn remove_annotation(&mut self, key: &str) -> Option<String> {
        self.annotations_mut().remove(key)
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().get(key).map(String::as_str)
    }

    /// Value of the reserved `type` annotation.
    fn type_name(&self) -> Option<&str> {
        self.annotation(TYPE_KEY)
    }

    fn is_empty(&self) -> bool {
        self.annotations().is_empty()
    }

    /// Canonical string form: `kind{3:pid=4:1234,4:type=7:Process,}` in key
    /// order. Keys and values carry their byte length, so no annotation
    /// content can imitate a separator.
    fn canonical_string(&self) -> String {
        let mut body = String::new();
        for (k, v) in self.annotations() {
            let _ = write!(body, "{}:{}={}:{},", k.len(), k, v.len(), v);
        }
        format!("{}{{{}}}", Self::KIND, body)
    }

    /// Fixed hash if present, otherwise the hex digest of the canonical string.
    fn content_hash(&self) -> String {
        match self.fixed_hash() {
            Some(fixed) => fixed.to_string(),
            None => blake3::hash(self.canonical_string().as_bytes())
                .to_hex()
                .to_string(),
        }
    }

    /// Reference elements carry an externally supplied hash.
    fn is_reference(&self) -> bool {
        self.fixed_hash().is_some()
    }
}

// =============================================================================
// VERTEX
// =============================================================================

/// A provenance vertex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vertex {
    annotations: BTreeMap<String, String>,
    /// Distance label assigned by lineage queries. Not part of identity.
    #[serde(default)]
    pub depth: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fixed_hash: Option<String>,
}

impl Vertex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reference vertex whose content hash is `hash`.
    #[must_use]
    pub fn with_fixed_hash(hash: impl Into<String>) -> Self {
        Self {
            fixed_hash: Some(hash.into()),
            ..Self::default()
        }
    }

    /// Builder form of [`GraphElement::add_annotation`].
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.add_annotation(key, Some(value));
        self
    }
}

impl GraphElement for Vertex {
    const KIND: &'static str = "vertex";

    fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.annotations
    }

    fn fixed_hash(&self) -> Option<&str> {
        self.fixed_hash.as_deref()
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.annotations == other.annotations
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.annotations.hash(state);
    }
}

// =============================================================================
// EDGE
// =============================================================================

/// A provenance edge from `child` (source) to `parent` (destination).
///
/// Endpoints are shared handles; an edge lacking either one is rejected
/// by the buffer before it can enter the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Edge {
    annotations: BTreeMap<String, String>,
    pub depth: i32,
    fixed_hash: Option<String>,
    child: Option<Arc<Vertex>>,
    parent: Option<Arc<Vertex>>,
}

impl Edge {
    #[must_use]
    pub fn new(child: Arc<Vertex>, parent: Arc<Vertex>) -> Self {
        Self {
            child: Some(child),
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// An edge with no endpoints yet.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.add_annotation(key, Some(value));
        self
    }

    #[must_use]
    pub fn with_fixed_hash(mut self, hash: impl Into<String>) -> Self {
        self.fixed_hash = Some(hash.into());
        self
    }

    pub fn child(&self) -> Option<&Arc<Vertex>> {
        self.child.as_ref()
    }

    pub fn parent(&self) -> Option<&Arc<Vertex>> {
        self.parent.as_ref()
    }

    pub fn set_child(&mut self, child: Arc<Vertex>) {
        self.child = Some(child);
    }

    pub fn set_parent(&mut self, parent: Arc<Vertex>) {
        self.parent = Some(parent);
    }

    /// Both endpoints, or `None` if either is missing.
    pub fn endpoints(&self) -> Option<(&Vertex, &Vertex)> {
        match (&self.child, &self.parent) {
            (Some(child), Some(parent)) => Some((child.as_ref(), parent.as_ref())),
            _ => None,
        }
    }
}

impl GraphElement for Edge {
    const KIND: &'static str = "edge";

    fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.annotations
    }

    fn fixed_hash(&self) -> Option<&str> {
        self.fixed_hash.as_deref()
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.annotations == other.annotations
    }
}

impl Eq for Edge {}

impl Hash for Edge {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.annotations.hash(state);
    }
}

// =============================================================================
// ELEMENT
// =============================================================================

/// Unit of data flowing from a reporter buffer into the filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Vertex(Vertex),
    Edge(Edge),
}

impl From<Vertex> for Element {
    fn from(v: Vertex) -> Self {
        Self::Vertex(v)
    }
}

impl From<Edge> for Element {
    fn from(e: Edge) -> Self {
        Self::Edge(e)
    }
}

// =============================================================================
// TESTS
// =============================================================================
