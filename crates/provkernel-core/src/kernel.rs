//! # Kernel Context
//!
//! One [`Kernel`] per process, shared by reference (`Arc<Kernel>`) with the
//! dispatch loop and every connection handler. It owns the component
//! registries and the plugin [`Registry`] used to instantiate components.
//!
//! ## Locking
//!
//! - Filter chain lock, then storages, then sketches (the dispatch path).
//! - The reporter list is never held while the chain lock is taken.
//! - The transformer chain has its own lock and nests with nothing.
//!
//! ## Removal
//!
//! `remove reporter|storage` marks the component and blocks the caller on
//! a condition variable until the dispatch loop has drained or reaped it.
//! Without a configured timeout the wait is unbounded.

use crate::KernelError;
use crate::buffer::Buffer;
use crate::filter::{FilterChain, FilterStage};
use crate::graph::Graph;
use crate::query::{MemoryQueryEngine, QUERY_HELP, QueryEngine, QueryParameters};
use crate::registry::Registry;
use crate::reporter::ReporterEntry;
use crate::sketch::SketchEntry;
use crate::storage::{CommitCounts, SharedGraph, StorageRecord};
use crate::transformer::{TransformerChain, TransformerStage};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Maximum elements drained from one buffer per dispatch iteration.
pub const DEFAULT_BATCH_LIMIT: usize = 1_000_000;

/// Sleep between dispatch iterations.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// SETTINGS
// =============================================================================

/// Tunables surfaced from the application configuration.
#[derive(Debug, Clone)]
pub struct KernelSettings {
    /// Configuration script saved on shutdown. `None` disables saving.
    pub config_file: Option<PathBuf>,
    pub batch_limit: usize,
    pub idle_interval: Duration,
    /// Upper bound for `remove reporter|storage`. `None` waits indefinitely.
    pub removal_timeout: Option<Duration>,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            config_file: None,
            batch_limit: DEFAULT_BATCH_LIMIT,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            removal_timeout: None,
        }
    }
}

// =============================================================================
// REMOVALS
// =============================================================================

/// Completion signals for pending removals, keyed by component id.
#[derive(Debug, Default)]
pub(crate) struct Removals {
    pending: Mutex<BTreeMap<u64, Option<CommitCounts>>>,
    signal: Condvar,
}

impl Removals {
    pub(crate) fn begin(&self, id: u64) {
        self.pending.lock().insert(id, None);
    }

    pub(crate) fn complete(&self, id: u64, counts: CommitCounts) {
        let mut pending = self.pending.lock();
        if let Some(slot) = pending.get_mut(&id) {
            *slot = Some(counts);
            self.signal.notify_all();
        }
    }

    /// Block until `id` completes. `None` on timeout.
    pub(crate) fn wait(&self, id: u64, timeout: Option<Duration>) -> Option<CommitCounts> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = self.pending.lock();
        loop {
            if let Some(Some(counts)) = pending.get(&id).copied() {
                pending.remove(&id);
                return Some(counts);
            }
            match deadline {
                Some(deadline) => {
                    if self.signal.wait_until(&mut pending, deadline).timed_out() {
                        if let Some(Some(counts)) = pending.remove(&id) {
                            return Some(counts);
                        }
                        return None;
                    }
                }
                None => self.signal.wait(&mut pending),
            }
        }
    }
}

// =============================================================================
// KERNEL
// =============================================================================

/// Outcome of a query line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryReply {
    /// The transformed result; `None` when a transformer discarded it.
    Graph(Option<Graph>),
    /// No graph was produced; usage text, possibly prefixed by an error.
    Help(String),
}

/// Summary line for a registered storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub name: String,
    pub arguments: String,
    pub counts: CommitCounts,
}

/// The process-wide kernel context.
pub struct Kernel {
    settings: KernelSettings,
    registry: Registry,
    engine: Arc<dyn QueryEngine>,
    pub(crate) reporters: Mutex<Vec<ReporterEntry>>,
    pub(crate) chain: FilterChain,
    transformers: TransformerChain,
    remote_sketches: Mutex<BTreeMap<String, serde_json::Value>>,
    pub(crate) removals: Removals,
    /// Held for one whole dispatch iteration so buffers drain in order.
    pub(crate) dispatch_lock: Mutex<()>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
    halted: AtomicBool,
    pub(crate) flush_requested: AtomicBool,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("filters", &self.chain.len())
            .field("transformers", &self.transformers.len())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

fn to_config_arguments(arguments: &str) -> String {
    arguments.trim().to_string()
}

impl Kernel {
    #[must_use]
    pub fn new(settings: KernelSettings, registry: Registry, engine: Arc<dyn QueryEngine>) -> Self {
        Self {
            settings,
            registry,
            engine,
            reporters: Mutex::new(Vec::new()),
            chain: FilterChain::new(),
            transformers: TransformerChain::new(),
            remote_sketches: Mutex::new(BTreeMap::new()),
            removals: Removals::default(),
            dispatch_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            flush_requested: AtomicBool::new(true),
        }
    }

    /// Kernel with the built-in components and the memory query engine.
    #[must_use]
    pub fn with_builtins(settings: KernelSettings) -> Self {
        let graph = SharedGraph::default();
        let registry = Registry::with_builtins(Arc::clone(&graph));
        Self::new(settings, registry, Arc::new(MemoryQueryEngine::new(graph)))
    }

    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // LIFECYCLE FLAGS
    // =========================================================================

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Set once [`shutdown`](Self::shutdown) has finished; the dispatch loop exits.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Refuse new components once shutdown has begun.
    fn ensure_running(&self) -> Result<(), KernelError> {
        if self.is_shutdown() {
            return Err(KernelError::Initialization(
                "kernel is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    /// Removals wait on the dispatch loop, which is gone once halted.
    fn ensure_not_halted(&self) -> Result<(), KernelError> {
        if self.is_halted() {
            return Err(KernelError::Timeout("kernel has halted".to_string()));
        }
        Ok(())
    }

    /// Ask the dispatch loop to flush every storage on its next iteration.
    pub fn request_flush(&self) {
        self.flush_requested.store(true, Ordering::Release);
    }

    // =========================================================================
    // ADD
    // =========================================================================

    /// Launch and register a reporter with a fresh buffer.
    pub fn add_reporter(&self, name: &str, arguments: &str) -> Result<(), KernelError> {
        self.ensure_running()?;
        let mut reporter = self.registry.reporter(name)?;
        let buffer = Arc::new(Buffer::new());
        reporter.launch(arguments, Arc::clone(&buffer))?;

        let entry = ReporterEntry {
            id: self.allocate_id(),
            name: name.to_string(),
            arguments: to_config_arguments(arguments),
            buffer,
            reporter,
            pending_removal: false,
        };
        {
            // Shutdown marks every listed reporter under this lock.
            let mut reporters = self.reporters.lock();
            if self.is_shutdown() {
                drop(reporters);
                let mut entry = entry;
                entry.reporter.shutdown();
                return Err(KernelError::Initialization(
                    "kernel is shutting down".to_string(),
                ));
            }
            reporters.push(entry);
        }
        tracing::info!(reporter = name, "reporter added");
        Ok(())
    }

    /// Initialize and register a storage.
    pub fn add_storage(&self, name: &str, arguments: &str) -> Result<(), KernelError> {
        self.ensure_running()?;
        let mut storage = self.registry.storage(name)?;
        storage.initialize(arguments)?;
        let record = StorageRecord::new(
            self.allocate_id(),
            name,
            &to_config_arguments(arguments),
            storage,
        );
        {
            let mut storages = self.chain.terminal().storages().lock();
            if self.is_shutdown() {
                drop(storages);
                let mut record = record;
                record.shutdown();
                return Err(KernelError::Initialization(
                    "kernel is shutting down".to_string(),
                ));
            }
            storages.push(record);
        }
        tracing::info!(storage = name, "storage added");
        Ok(())
    }

    /// Initialize a filter and splice it in at 1-based `position`.
    pub fn add_filter(&self, name: &str, position: usize, arguments: &str) -> Result<(), KernelError> {
        self.ensure_running()?;
        let user_filters = self.chain.len();
        if position == 0 || position > user_filters + 1 {
            return Err(KernelError::InvalidPosition(format!(
                "{} (valid: 1..={})",
                position,
                user_filters + 1
            )));
        }
        let mut filter = self.registry.filter(name)?;
        filter.initialize(arguments)?;

        let stage = FilterStage {
            name: name.to_string(),
            arguments: to_config_arguments(arguments),
            filter,
        };
        if let Err(mut rejected) = self.chain.insert(position, stage) {
            rejected.filter.shutdown();
            return Err(KernelError::InvalidPosition(position.to_string()));
        }
        tracing::info!(filter = name, position, "filter added");
        Ok(())
    }

    /// Initialize a transformer and insert it at 1-based `position`.
    pub fn add_transformer(
        &self,
        name: &str,
        position: usize,
        arguments: &str,
    ) -> Result<(), KernelError> {
        self.ensure_running()?;
        let count = self.transformers.len();
        if position == 0 || position > count + 1 {
            return Err(KernelError::InvalidPosition(format!(
                "{} (valid: 1..={})",
                position,
                count + 1
            )));
        }
        let mut transformer = self.registry.transformer(name)?;
        transformer.initialize(arguments)?;

        let stage = TransformerStage {
            name: name.to_string(),
            arguments: to_config_arguments(arguments),
            transformer,
        };
        if let Err(mut rejected) = self.transformers.insert(position, stage) {
            rejected.transformer.shutdown();
            return Err(KernelError::InvalidPosition(position.to_string()));
        }
        tracing::info!(transformer = name, position, "transformer added");
        Ok(())
    }

    pub fn add_sketch(&self, name: &str) -> Result<(), KernelError> {
        self.ensure_running()?;
        let sketch = self.registry.sketch(name)?;
        self.chain.terminal().sketches().lock().push(SketchEntry {
            name: name.to_string(),
            sketch,
        });
        tracing::info!(sketch = name, "sketch added");
        Ok(())
    }

    // =========================================================================
    // REMOVE
    // =========================================================================

    /// Shut a reporter down and wait until its buffer has been drained.
    pub fn remove_reporter(&self, name: &str) -> Result<(), KernelError> {
        self.ensure_not_halted()?;
        let id = {
            let mut reporters = self.reporters.lock();
            let entry = reporters
                .iter_mut()
                .find(|e| e.name == name && !e.pending_removal)
                .ok_or_else(|| KernelError::NotFound {
                    kind: "Reporter".to_string(),
                    name: name.to_string(),
                })?;
            if !entry.reporter.shutdown() {
                tracing::warn!(reporter = name, "reporter reported an unclean shutdown");
            }
            entry.pending_removal = true;
            self.removals.begin(entry.id);
            entry.id
        };
        tracing::info!(reporter = name, "waiting for reporter buffer to drain");

        self.removals
            .wait(id, self.settings.removal_timeout)
            .map(|_| ())
            .ok_or_else(|| KernelError::Timeout(format!("reporter {} did not drain", name)))
    }

    /// Mark a storage for removal and wait for the dispatch loop to reap it.
    pub fn remove_storage(&self, name: &str) -> Result<CommitCounts, KernelError> {
        self.ensure_not_halted()?;
        let id = {
            let mut storages = self.chain.terminal().storages().lock();
            let record = storages
                .iter_mut()
                .find(|r| r.name == name && r.is_active())
                .ok_or_else(|| KernelError::NotFound {
                    kind: "Storage".to_string(),
                    name: name.to_string(),
                })?;
            record.mark_for_removal();
            self.removals.begin(record.id);
            record.id
        };

        self.removals
            .wait(id, self.settings.removal_timeout)
            .ok_or_else(|| KernelError::Timeout(format!("storage {} was not reaped", name)))
    }

    pub fn remove_sketch(&self, name: &str) -> Result<(), KernelError> {
        let mut sketches = self.chain.terminal().sketches().lock();
        let index = sketches
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| KernelError::NotFound {
                kind: "Sketch".to_string(),
                name: name.to_string(),
            })?;
        sketches.remove(index);
        tracing::info!(sketch = name, "sketch removed");
        Ok(())
    }

    /// Splice out the filter at 1-based `index` and shut it down.
    pub fn remove_filter(&self, index: usize) -> Result<String, KernelError> {
        let mut stage = self
            .chain
            .remove(index)
            .ok_or_else(|| KernelError::BadIndex(index.to_string()))?;
        if !stage.filter.shutdown() {
            tracing::warn!(filter = %stage.name, "filter reported an unclean shutdown");
        }
        tracing::info!(filter = %stage.name, index, "filter removed");
        Ok(stage.name)
    }

    /// Remove the transformer at 1-based `index` and shut it down.
    pub fn remove_transformer(&self, index: usize) -> Result<String, KernelError> {
        let mut stage = self
            .transformers
            .remove(index)
            .ok_or_else(|| KernelError::BadIndex(index.to_string()))?;
        if !stage.transformer.shutdown() {
            tracing::warn!(transformer = %stage.name, "transformer reported an unclean shutdown");
        }
        tracing::info!(transformer = %stage.name, index, "transformer removed");
        Ok(stage.name)
    }

    // =========================================================================
    // LIST
    // =========================================================================

    /// Active reporters as `(name, arguments)`.
    pub fn reporters(&self) -> Vec<(String, String)> {
        self.reporters
            .lock()
            .iter()
            .filter(|e| !e.pending_removal)
            .map(|e| (e.name.clone(), e.arguments.clone()))
            .collect()
    }

    /// Active storages with their counters.
    pub fn storages(&self) -> Vec<StorageInfo> {
        self.chain
            .terminal()
            .storages()
            .lock()
            .iter()
            .filter(|r| r.is_active())
            .map(|r| StorageInfo {
                name: r.name.clone(),
                arguments: r.arguments.clone(),
                counts: r.counts(),
            })
            .collect()
    }

    pub fn filters(&self) -> Vec<(String, String)> {
        self.chain.list()
    }

    pub fn transformers(&self) -> Vec<(String, String)> {
        self.transformers.list()
    }

    pub fn sketches(&self) -> Vec<String> {
        self.chain
            .terminal()
            .sketches()
            .lock()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    // =========================================================================
    // SKETCH EXCHANGE
    // =========================================================================

    /// Summary of every local sketch, keyed by sketch name.
    pub fn sketch_summaries(&self) -> BTreeMap<String, serde_json::Value> {
        self.chain
            .terminal()
            .sketches()
            .lock()
            .iter()
            .map(|s| (s.name.clone(), s.sketch.summary()))
            .collect()
    }

    /// Cache the summaries received from a remote kernel.
    pub fn put_remote_sketch(&self, host: &str, summary: serde_json::Value) {
        self.remote_sketches.lock().insert(host.to_string(), summary);
    }

    pub fn remote_sketch(&self, host: &str) -> Option<serde_json::Value> {
        self.remote_sketches.lock().get(host).cloned()
    }

    pub fn remote_sketch_hosts(&self) -> Vec<String> {
        self.remote_sketches.lock().keys().cloned().collect()
    }

    // =========================================================================
    // QUERY
    // =========================================================================

    /// Execute a query line and run the result through the transformers.
    pub fn query(&self, line: &str) -> QueryReply {
        let params = match QueryParameters::parse(line) {
            Ok(p) => p,
            Err(e) => return QueryReply::Help(format!("error: {}\n{}", e, QUERY_HELP)),
        };
        match self.engine.execute(&params) {
            Ok(Some(graph)) => QueryReply::Graph(self.transformers.iterate(graph, &params)),
            Ok(None) => QueryReply::Help(QUERY_HELP.to_string()),
            Err(e) => {
                tracing::warn!(query = %params.raw, error = %e, "query failed");
                QueryReply::Help(format!("error: {}\n{}", e, QUERY_HELP))
            }
        }
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Mark the kernel as shutting down; listeners stop accepting.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Full shutdown: save the configuration, drain reporters, then shut
    /// down filters, transformers and storages in that order.
    ///
    /// Remaining reporter buffers are drained on the calling thread.
    /// Failures are logged, never returned.
    pub fn shutdown(&self) {
        if self.is_halted() {
            return;
        }
        self.begin_shutdown();
        tracing::info!("shutting down kernel");

        if let Some(path) = &self.settings.config_file {
            match self.save_config(path) {
                Ok(()) => tracing::info!(path = %path.display(), "configuration saved"),
                Err(e) => tracing::error!(path = %path.display(), error = %e, "configuration save failed"),
            }
        }

        for entry in self.reporters.lock().iter_mut() {
            if !entry.pending_removal {
                if !entry.reporter.shutdown() {
                    tracing::warn!(reporter = %entry.name, "reporter reported an unclean shutdown");
                }
                entry.pending_removal = true;
            }
        }
        while !self.reporters.lock().is_empty() {
            crate::dispatch::dispatch_once(self);
        }

        for mut stage in self.chain.drain() {
            if !stage.filter.shutdown() {
                tracing::warn!(filter = %stage.name, "filter reported an unclean shutdown");
            }
        }
        for mut stage in self.transformers.drain() {
            stage.transformer.shutdown();
        }

        let storages = std::mem::take(&mut *self.chain.terminal().storages().lock());
        for mut record in storages {
            let counts = record.shutdown();
            self.removals.complete(record.id, counts);
            tracing::info!(
                storage = %record.name,
                vertices = counts.vertices,
                edges = counts.edges,
                "storage shut down"
            );
        }

        self.halted.store(true, Ordering::Release);
        tracing::info!("kernel halted");
    }
}

// =============================================================================
// TESTS
// =============================================================================
