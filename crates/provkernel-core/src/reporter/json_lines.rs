//! # JSON Lines Reporter
//!
//! Reads one JSON record per line from a file:
//!
//! ```text
//! {"kind":"vertex","id":"p1","annotations":{"type":"Process","pid":"1"}}
//! {"kind":"edge","child":"p2","parent":"p1","annotations":{"type":"WasTriggeredBy"}}
//! ```
//!
//! `id` is local to the file and only used to resolve edge endpoints.
//! Edges naming an unseen id are rejected by the buffer and logged.
//!
//! Arguments: `path=<file> [follow=<bool>]`. With `follow` the reporter
//! keeps polling for appended lines until shut down.

use super::Reporter;
use crate::KernelError;
use crate::args;
use crate::buffer::Buffer;
use crate::element::{Edge, GraphElement, Vertex};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll interval while following a file.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Record {
    Vertex {
        id: String,
        #[serde(default)]
        annotations: BTreeMap<String, String>,
    },
    Edge {
        child: String,
        parent: String,
        #[serde(default)]
        annotations: BTreeMap<String, String>,
    },
}

/// Reporter reading newline-delimited JSON records.
#[derive(Debug, Default)]
pub struct JsonLinesReporter {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl JsonLinesReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct Reader {
    path: PathBuf,
    follow: bool,
    buffer: Arc<Buffer>,
    stop: Arc<AtomicBool>,
    vertices: BTreeMap<String, Arc<Vertex>>,
}

impl Reader {
    fn run(mut self, file: File) {
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut line_no = 0u64;

        while !self.stop.load(Ordering::Acquire) {
            match reader.read_line(&mut line) {
                Ok(0) => {
                    if !self.follow {
                        break;
                    }
                    std::thread::sleep(FOLLOW_INTERVAL);
                    continue;
                }
                Ok(_) if self.follow && !line.ends_with('\n') => {
                    // Partial line; wait for the writer to finish it.
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(path = %self.path.display(), error = %e, "read failed");
                    break;
                }
            }
            line_no += 1;
            let text = line.trim();
            if !text.is_empty() {
                self.handle(line_no, text);
            }
            line.clear();
        }

        // Flush a final unterminated line.
        let text = line.trim().to_string();
        if !text.is_empty() {
            self.handle(line_no + 1, &text);
        }
    }

    fn handle(&mut self, line_no: u64, text: &str) {
        let record: Record = match serde_json::from_str(text) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), line = line_no, error = %e, "skipping malformed record");
                return;
            }
        };

        let result = match record {
            Record::Vertex { id, annotations } => {
                let mut vertex = Vertex::new();
                vertex.add_annotations(&annotations);
                self.vertices.insert(id, Arc::new(vertex.clone()));
                self.buffer.put(vertex)
            }
            Record::Edge {
                child,
                parent,
                annotations,
            } => {
                let mut edge = Edge::detached();
                edge.add_annotations(&annotations);
                if let Some(v) = self.vertices.get(&child) {
                    edge.set_child(Arc::clone(v));
                }
                if let Some(v) = self.vertices.get(&parent) {
                    edge.set_parent(Arc::clone(v));
                }
                self.buffer.put(edge)
            }
        };

        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), line = line_no, error = %e, "record rejected");
        }
    }
}

impl Reporter for JsonLinesReporter {
    fn launch(&mut self, arguments: &str, buffer: Arc<Buffer>) -> Result<(), KernelError> {
        let map = args::parse_key_values(arguments)?;
        let path = PathBuf::from(args::require(&map, "path")?);
        let follow = match map.get("follow") {
            Some(v) => args::parse_bool(v)?,
            None => false,
        };
        let file = File::open(&path)
            .map_err(|e| KernelError::Io(format!("{}: {}", path.display(), e)))?;

        self.stop.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let reader = Reader {
            path,
            follow,
            buffer,
            stop: Arc::clone(&self.stop),
            vertices: BTreeMap::new(),
        };
        let running = Arc::clone(&self.running);
        let worker = std::thread::Builder::new()
            .name("reporter-jsonlines".to_string())
            .spawn(move || {
                reader.run(file);
                running.store(false, Ordering::Release);
            })
            .map_err(|e| KernelError::Io(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn shutdown(&mut self) -> bool {
        self.stop.store(true, Ordering::Release);
        match self.worker.take() {
            Some(worker) => worker.join().is_ok(),
            None => true,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

// =============================================================================
// TESTS
// =============================================================================
