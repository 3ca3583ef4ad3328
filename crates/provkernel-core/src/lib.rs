//! # provkernel-core
//!
//! The provenance collection kernel.
//!
//! Reporters push vertices and edges into per-reporter buffers. A single
//! dispatch loop drains those buffers through an ordered filter chain whose
//! terminal stage commits to every active storage and feeds every sketch.
//! Queries run against a [`QueryEngine`] and their results pass through the
//! transformer chain. All components can be added and removed at runtime
//! through text control commands.
//!
//! ## Architectural Constraints
//!
//! - No async, no network: transports live in the application crate
//! - Components are resolved by name through the [`Registry`]
//! - One misbehaving component never stops the dispatch loop

// =============================================================================
// MODULES
// =============================================================================

pub mod args;
pub mod buffer;
pub mod control;
pub mod dispatch;
pub mod element;
pub mod error;
pub mod filter;
pub mod graph;
pub mod kernel;
pub mod query;
pub mod registry;
pub mod reporter;
pub mod sketch;
pub mod storage;
pub mod transformer;

// =============================================================================
// RE-EXPORTS: Elements and Errors
// =============================================================================

pub use element::{Edge, Element, GraphElement, TYPE_KEY, Vertex};
pub use error::KernelError;

// =============================================================================
// RE-EXPORTS: Kernel
// =============================================================================

pub use buffer::{Buffer, Polled};
pub use control::control_help;
pub use graph::{Graph, GraphEdge};
pub use kernel::{Kernel, KernelSettings, QueryReply, StorageInfo};
pub use registry::{Kind, Registry};

// =============================================================================
// RE-EXPORTS: Components
// =============================================================================

pub use filter::{Downstream, Filter, FilterChain, FilterStage, ProcessFilter};
pub use query::{Direction, MemoryQueryEngine, QUERY_HELP, QueryEngine, QueryParameters};
pub use reporter::{JsonLinesReporter, Reporter};
pub use sketch::{CounterSketch, Sketch};
pub use storage::{CommitCounts, MemoryStorage, RedbStorage, SharedGraph, Storage};
pub use transformer::{MaxDepth, StripAnnotations, Transformer, TransformerChain};
