//! # Dispatch Loop
//!
//! The single consumer of every reporter buffer. One iteration:
//!
//! 1. Flush storages if a flush was requested.
//! 2. Reap storages marked for removal and signal their waiters.
//! 3. Drain each buffer (up to the batch limit) through the filter chain.
//! 4. Drop pending reporters whose buffer ran dry and signal their waiters.
//!
//! A panic in a filter or storage while handling one element is caught,
//! logged and the element dropped. Storage flush and shutdown panics are
//! contained by [`StorageRecord`]. The loop keeps running.

use crate::buffer::{Buffer, Polled};
use crate::kernel::Kernel;
use crate::storage::StorageRecord;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Run the dispatch loop until the kernel halts.
pub fn run(kernel: Arc<Kernel>) {
    tracing::debug!("dispatch loop started");
    while !kernel.is_halted() {
        if catch_unwind(AssertUnwindSafe(|| dispatch_once(&kernel))).is_err() {
            tracing::error!("panic escaped a dispatch iteration; continuing");
        }
        std::thread::sleep(kernel.settings().idle_interval);
    }
    tracing::debug!("dispatch loop stopped");
}

/// Spawn [`run`] on a named thread.
pub fn spawn(kernel: Arc<Kernel>) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("provkernel-dispatch".to_string())
        .spawn(move || run(kernel))
}

/// One pass over storages and reporter buffers.
///
/// Returns the number of elements moved through the chain.
pub fn dispatch_once(kernel: &Kernel) -> usize {
    let _iteration = kernel.dispatch_lock.lock();

    if kernel.flush_requested.swap(false, Ordering::AcqRel) {
        for record in kernel
            .chain
            .terminal()
            .storages()
            .lock()
            .iter_mut()
            .filter(|r| r.is_active())
        {
            record.flush();
        }
    }

    reap_storages(kernel);

    let snapshot: Vec<(u64, Arc<Buffer>, bool)> = kernel
        .reporters
        .lock()
        .iter()
        .map(|e| (e.id, Arc::clone(&e.buffer), e.pending_removal))
        .collect();

    let batch_limit = kernel.settings().batch_limit;
    let mut moved = 0usize;
    let mut all_drained = true;

    for (id, buffer, pending) in snapshot {
        let mut taken = 0usize;
        let mut drained = false;
        while taken < batch_limit {
            match buffer.get_next() {
                Polled::Element(element) => {
                    taken += 1;
                    let chain = &kernel.chain;
                    if catch_unwind(AssertUnwindSafe(|| chain.put(element))).is_err() {
                        tracing::error!(reporter_id = id, "panic while dispatching element; dropped");
                    }
                }
                Polled::Drained => {
                    drained = true;
                    break;
                }
            }
        }
        moved += taken;
        all_drained &= drained;

        if drained && pending {
            let removed = {
                let mut reporters = kernel.reporters.lock();
                reporters
                    .iter()
                    .position(|e| e.id == id)
                    .map(|index| reporters.remove(index))
            };
            if let Some(entry) = removed {
                tracing::info!(reporter = %entry.name, "reporter drained and removed");
                kernel.removals.complete(id, Default::default());
            }
        }
    }

    if moved > 0 && all_drained {
        kernel.request_flush();
    }
    moved
}

fn reap_storages(kernel: &Kernel) {
    let reaped: Vec<StorageRecord> = {
        let mut storages = kernel.chain.terminal().storages().lock();
        let (marked, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *storages).into_iter().partition(|r| !r.is_active());
        *storages = kept;
        marked
    };

    for mut record in reaped {
        let counts = record.shutdown();
        tracing::info!(
            storage = %record.name,
            vertices = counts.vertices,
            edges = counts.edges,
            "storage removed"
        );
        kernel.removals.complete(record.id, counts);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelError;
    use crate::element::{Edge, GraphElement, Vertex};
    use crate::filter::{Downstream, Filter, FilterStage};
    use crate::kernel::KernelSettings;
    use crate::query::MemoryQueryEngine;
    use crate::registry::Registry;
    use crate::reporter::{Reporter, ReporterEntry};
    use crate::storage::{SharedGraph, Storage};
    use std::time::Duration;

    struct Idle;

    impl Reporter for Idle {
        fn launch(&mut self, _arguments: &str, _buffer: Arc<Buffer>) -> Result<(), KernelError> {
            Ok(())
        }

        fn shutdown(&mut self) -> bool {
            true
        }

        fn is_running(&self) -> bool {
            false
        }
    }

    struct Explode;

    impl Filter for Explode {
        #[allow(clippy::panic)]
        fn put_vertex(&mut self, vertex: Vertex, next: &mut Downstream<'_>) {
            if vertex.annotation("boom").is_some() {
                panic!("filter failure");
            }
            next.put_vertex(vertex);
        }

        fn put_edge(&mut self, edge: Edge, next: &mut Downstream<'_>) {
            next.put_edge(edge);
        }
    }

    /// Counts commits, panics on every flush.
    struct FlushBomb;

    #[allow(clippy::panic)]
    impl Storage for FlushBomb {
        fn initialize(&mut self, _arguments: &str) -> Result<(), KernelError> {
            Ok(())
        }

        fn commit_vertex(&mut self, _vertex: &Vertex) -> Result<(), KernelError> {
            Ok(())
        }

        fn commit_edge(&mut self, _edge: &Edge) -> Result<(), KernelError> {
            Ok(())
        }

        fn flush_transactions(&mut self) -> Result<(), KernelError> {
            panic!("flush failure");
        }

        fn shutdown(&mut self) -> bool {
            true
        }
    }

    fn kernel_with_buffer(batch_limit: usize) -> (Kernel, Arc<Buffer>) {
        let kernel = Kernel::with_builtins(KernelSettings {
            batch_limit,
            ..KernelSettings::default()
        });
        kernel.add_storage("Memory", "").expect("storage");
        let buffer = Arc::new(Buffer::new());
        kernel.reporters.lock().push(ReporterEntry {
            id: 100,
            name: "Idle".to_string(),
            arguments: String::new(),
            buffer: Arc::clone(&buffer),
            reporter: Box::new(Idle),
            pending_removal: false,
        });
        (kernel, buffer)
    }

    #[test]
    fn test_batch_limit_bounds_one_iteration() {
        let (kernel, buffer) = kernel_with_buffer(2);
        for pid in 0..5 {
            buffer
                .put(Vertex::new().with("pid", &pid.to_string()))
                .expect("put");
        }
        assert_eq!(dispatch_once(&kernel), 2);
        assert_eq!(buffer.len(), 3);
        assert_eq!(dispatch_once(&kernel), 2);
        assert_eq!(dispatch_once(&kernel), 1);
        assert_eq!(kernel.storages()[0].counts.vertices, 5);
    }

    #[test]
    fn test_panicking_filter_drops_only_that_element() {
        let (kernel, buffer) = kernel_with_buffer(100);
        assert!(
            kernel
                .chain
                .insert(
                    1,
                    FilterStage {
                        name: "Explode".to_string(),
                        arguments: String::new(),
                        filter: Box::new(Explode),
                    },
                )
                .is_ok()
        );
        buffer.put(Vertex::new().with("pid", "1")).expect("put");
        buffer.put(Vertex::new().with("boom", "x")).expect("put");
        buffer.put(Vertex::new().with("pid", "2")).expect("put");

        assert_eq!(dispatch_once(&kernel), 3);
        assert_eq!(kernel.storages()[0].counts.vertices, 2);
    }

    #[test]
    fn test_pending_reporter_removed_once_drained() {
        let (kernel, buffer) = kernel_with_buffer(100);
        buffer.put(Vertex::new().with("pid", "1")).expect("put");
        kernel.reporters.lock()[0].pending_removal = true;
        kernel.removals.begin(100);

        dispatch_once(&kernel);
        assert!(kernel.reporters().is_empty());
        assert!(kernel.reporters.lock().is_empty());
        assert!(
            kernel
                .removals
                .wait(100, Some(std::time::Duration::from_millis(10)))
                .is_some()
        );
        assert_eq!(kernel.storages()[0].counts.vertices, 1);
    }

    #[test]
    fn test_marked_storage_is_reaped() {
        let (kernel, _buffer) = kernel_with_buffer(100);
        let id = {
            let mut storages = kernel.chain.terminal().storages().lock();
            storages[0].mark_for_removal();
            storages[0].id
        };
        kernel.removals.begin(id);
        dispatch_once(&kernel);
        assert!(kernel.chain.terminal().storages().lock().is_empty());
        assert!(kernel.removals.wait(id, None).is_some());
    }

    #[test]
    fn test_loop_survives_storage_panicking_on_flush() {
        let mut registry = Registry::new();
        registry.register_storage("FlushBomb", || Box::new(FlushBomb));
        let kernel = Arc::new(Kernel::new(
            KernelSettings {
                idle_interval: Duration::from_millis(1),
                ..KernelSettings::default()
            },
            registry,
            Arc::new(MemoryQueryEngine::new(SharedGraph::default())),
        ));
        kernel.add_storage("FlushBomb", "").expect("storage");
        let buffer = Arc::new(Buffer::new());
        kernel.reporters.lock().push(ReporterEntry {
            id: 100,
            name: "Idle".to_string(),
            arguments: String::new(),
            buffer: Arc::clone(&buffer),
            reporter: Box::new(Idle),
            pending_removal: false,
        });

        let handle = spawn(Arc::clone(&kernel)).expect("dispatch thread");
        for pid in 0..3 {
            buffer
                .put(Vertex::new().with("pid", &pid.to_string()))
                .expect("put");
            std::thread::sleep(Duration::from_millis(30));
        }
        assert!(!handle.is_finished());
        assert_eq!(kernel.storages()[0].counts.vertices, 3);

        kernel.shutdown();
        assert!(handle.join().is_ok());
    }
}
