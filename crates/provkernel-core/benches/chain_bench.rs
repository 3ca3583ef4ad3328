//! # Chain Benchmarks
//!
//! Throughput of the dispatch path: buffer drain, filter chain, terminal
//! commit into a memory storage.
//!
//! Run with: `cargo bench -p provkernel-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use provkernel_core::{
    Buffer, Edge, Element, Graph, GraphElement, Kernel, KernelError, KernelSettings,
    MemoryQueryEngine, Registry, Reporter, SharedGraph, Vertex, dispatch,
};
use std::hint::black_box;
use std::sync::Arc;

/// Pushes a fixed element sequence into its buffer at launch.
struct Replay(Arc<Vec<Element>>);

impl Reporter for Replay {
    fn launch(&mut self, _arguments: &str, buffer: Arc<Buffer>) -> Result<(), KernelError> {
        for element in self.0.iter() {
            buffer.put(element.clone())?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> bool {
        true
    }

    fn is_running(&self) -> bool {
        false
    }
}

/// A process tree: each process triggered by the previous one.
fn process_tree(size: usize) -> Vec<(Vertex, Option<Edge>)> {
    let mut out = Vec::with_capacity(size);
    let mut previous: Option<Arc<Vertex>> = None;
    for pid in 0..size {
        let name = if pid == 0 { "bash" } else { "worker" };
        let vertex = Arc::new(
            Vertex::new()
                .with("type", "Process")
                .with("pid", &pid.to_string())
                .with("name", name),
        );
        let edge = previous
            .as_ref()
            .map(|parent| Edge::new(Arc::clone(&vertex), Arc::clone(parent)).with("type", "WasTriggeredBy"));
        out.push(((*vertex).clone(), edge));
        previous = Some(vertex);
    }
    out
}

fn kernel_with(elements: &Arc<Vec<Element>>, commands: &[&str]) -> Kernel {
    let graph = SharedGraph::default();
    let mut registry = Registry::with_builtins(Arc::clone(&graph));
    let elements = Arc::clone(elements);
    registry.register_reporter("Replay", move || Box::new(Replay(Arc::clone(&elements))));
    let kernel = Kernel::new(
        KernelSettings::default(),
        registry,
        Arc::new(MemoryQueryEngine::new(graph)),
    );
    for command in commands {
        let _ = kernel.execute(command);
    }
    kernel
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_buffer_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_put");

    for size in [100, 1000, 10000].iter() {
        let tree = process_tree(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let buffer = Buffer::new();
                for (vertex, _) in &tree {
                    let _ = buffer.put(vertex.clone());
                }
                black_box(buffer.len())
            });
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for (label, commands) in [
        ("memory", &["add storage Memory"][..]),
        (
            "process_filter",
            &[
                "add storage Memory",
                "add filter ProcessFilter position=1 key=name op== value=bash",
            ][..],
        ),
        ("counter_sketch", &["add sketch Counter"][..]),
    ] {
        let elements: Arc<Vec<Element>> = Arc::new(
            process_tree(1000)
                .into_iter()
                .flat_map(|(vertex, edge)| {
                    std::iter::once(Element::from(vertex)).chain(edge.map(Element::from))
                })
                .collect(),
        );
        group.bench_function(BenchmarkId::new(label, 1000), |b| {
            b.iter(|| {
                let kernel = kernel_with(&elements, commands);
                let _ = kernel.execute("add reporter Replay");
                black_box(dispatch::dispatch_once(&kernel))
            });
        });
    }

    group.finish();
}

fn bench_content_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash");

    for annotations in [4usize, 16, 64].iter() {
        let mut vertex = Vertex::new();
        for i in 0..*annotations {
            vertex.add_annotation(&format!("key{}", i), Some("value"));
        }
        group.bench_with_input(
            BenchmarkId::from_parameter(annotations),
            annotations,
            |b, _| {
                b.iter(|| black_box(vertex.content_hash()));
            },
        );
    }

    group.finish();
}

fn bench_graph_json(c: &mut Criterion) {
    let mut graph = Graph::new();
    for (vertex, edge) in process_tree(1000) {
        let _ = graph.add_vertex(vertex);
        if let Some(edge) = edge {
            let _ = graph.add_edge(edge);
        }
    }
    c.bench_function("graph_to_json_1000", |b| {
        b.iter(|| black_box(serde_json::to_string(&graph).map(|s| s.len())))
    });
}

criterion_group!(
    benches,
    bench_buffer_put,
    bench_dispatch,
    bench_content_hash,
    bench_graph_json,
);

criterion_main!(benches);
