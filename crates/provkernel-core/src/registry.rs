//! # Plugin Registry
//!
//! Maps component names to factories, one table per component kind.
//! `add <kind> <name>` resolves through here; an unknown name is an
//! [`KernelError::UnknownComponent`].

use crate::KernelError;
use crate::filter::{Filter, ProcessFilter};
use crate::reporter::{JsonLinesReporter, Reporter};
use crate::sketch::{CounterSketch, Sketch};
use crate::storage::{MemoryStorage, RedbStorage, SharedGraph, Storage};
use crate::transformer::{MaxDepth, StripAnnotations, Transformer};
use std::collections::BTreeMap;
use std::sync::Arc;

type Factory<T> = Box<dyn Fn() -> Box<T> + Send + Sync>;

/// Component kinds addressable by control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kind {
    Reporter,
    Storage,
    Filter,
    Transformer,
    Sketch,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reporter => "reporter",
            Self::Storage => "storage",
            Self::Filter => "filter",
            Self::Transformer => "transformer",
            Self::Sketch => "sketch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reporter" => Some(Self::Reporter),
            "storage" => Some(Self::Storage),
            "filter" => Some(Self::Filter),
            "transformer" => Some(Self::Transformer),
            "sketch" => Some(Self::Sketch),
            _ => None,
        }
    }
}

/// Factories for every component kind.
#[derive(Default)]
pub struct Registry {
    reporters: BTreeMap<String, Factory<dyn Reporter>>,
    storages: BTreeMap<String, Factory<dyn Storage>>,
    filters: BTreeMap<String, Factory<dyn Filter>>,
    transformers: BTreeMap<String, Factory<dyn Transformer>>,
    sketches: BTreeMap<String, Factory<dyn Sketch>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("reporters", &self.reporters.keys().collect::<Vec<_>>())
            .field("storages", &self.storages.keys().collect::<Vec<_>>())
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("transformers", &self.transformers.keys().collect::<Vec<_>>())
            .field("sketches", &self.sketches.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn lookup<T: ?Sized>(
    table: &BTreeMap<String, Factory<T>>,
    kind: Kind,
    name: &str,
) -> Result<Box<T>, KernelError> {
    table
        .get(name)
        .map(|factory| factory())
        .ok_or_else(|| KernelError::UnknownComponent {
            kind: kind.as_str().to_string(),
            name: name.to_string(),
        })
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in component. Memory storages commit into
    /// `graph`.
    #[must_use]
    pub fn with_builtins(graph: SharedGraph) -> Self {
        let mut registry = Self::new();
        registry.register_reporter("JsonLines", || Box::new(JsonLinesReporter::new()));
        registry.register_storage("Memory", move || {
            Box::new(MemoryStorage::new(Arc::clone(&graph)))
        });
        registry.register_storage("Redb", || Box::new(RedbStorage::new()));
        registry.register_filter("ProcessFilter", || Box::new(ProcessFilter::new()));
        registry.register_transformer("StripAnnotations", || Box::new(StripAnnotations::new()));
        registry.register_transformer("MaxDepth", || Box::new(MaxDepth::new()));
        registry.register_sketch("Counter", || Box::new(CounterSketch::new()));
        registry
    }

    pub fn register_reporter(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Reporter> + Send + Sync + 'static,
    ) {
        self.reporters.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_storage(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Storage> + Send + Sync + 'static,
    ) {
        self.storages.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_filter(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    ) {
        self.filters.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_transformer(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Transformer> + Send + Sync + 'static,
    ) {
        self.transformers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_sketch(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Sketch> + Send + Sync + 'static,
    ) {
        self.sketches.insert(name.to_string(), Box::new(factory));
    }

    pub fn reporter(&self, name: &str) -> Result<Box<dyn Reporter>, KernelError> {
        lookup(&self.reporters, Kind::Reporter, name)
    }

    pub fn storage(&self, name: &str) -> Result<Box<dyn Storage>, KernelError> {
        lookup(&self.storages, Kind::Storage, name)
    }

    pub fn filter(&self, name: &str) -> Result<Box<dyn Filter>, KernelError> {
        lookup(&self.filters, Kind::Filter, name)
    }

    pub fn transformer(&self, name: &str) -> Result<Box<dyn Transformer>, KernelError> {
        lookup(&self.transformers, Kind::Transformer, name)
    }

    pub fn sketch(&self, name: &str) -> Result<Box<dyn Sketch>, KernelError> {
        lookup(&self.sketches, Kind::Sketch, name)
    }
}
