//! # redb-backed Storage
//!
//! Persists committed vertices and edges in a redb database.
//!
//! Commits are staged in memory and written in a single write transaction
//! when the dispatch loop flushes, when the stage grows past
//! [`STAGE_LIMIT`], and on shutdown. Keys are content hashes; an edge key
//! is `child:parent:edge`. Values are postcard-encoded.
//!
//! Arguments: `path=<database file>`.

use super::Storage;
use crate::KernelError;
use crate::args;
use crate::element::{Edge, GraphElement, Vertex};
use redb::{Database, ReadableDatabase, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Table for vertices: content hash -> serialized StoredVertex
const VERTICES: TableDefinition<&str, &[u8]> = TableDefinition::new("vertices");

/// Table for edges: "child:parent:edge" -> serialized StoredEdge
const EDGES: TableDefinition<&str, &[u8]> = TableDefinition::new("edges");

/// Staged commits written without waiting for a flush request.
pub const STAGE_LIMIT: usize = 10_000;

#[derive(Debug, Serialize, Deserialize)]
struct StoredVertex {
    annotations: BTreeMap<String, String>,
    fixed_hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEdge {
    child: String,
    parent: String,
    annotations: BTreeMap<String, String>,
}

/// Persistent storage on redb.
#[derive(Default)]
pub struct RedbStorage {
    path: Option<PathBuf>,
    db: Option<Database>,
    staged_vertices: Vec<(String, Vec<u8>)>,
    staged_edges: Vec<(String, Vec<u8>)>,
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage")
            .field("path", &self.path)
            .field("staged_vertices", &self.staged_vertices.len())
            .field("staged_edges", &self.staged_edges.len())
            .finish_non_exhaustive()
    }
}

impl RedbStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn db(&self) -> Result<&Database, KernelError> {
        self.db
            .as_ref()
            .ok_or_else(|| KernelError::Storage("database is not open".to_string()))
    }

    fn staged(&self) -> usize {
        self.staged_vertices.len() + self.staged_edges.len()
    }

    /// Number of vertices and edges already written to disk.
    pub fn stored_counts(&self) -> Result<(u64, u64), KernelError> {
        let read_txn = self
            .db()?
            .begin_read()
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        let vertices = read_txn
            .open_table(VERTICES)
            .map_err(|e| KernelError::Storage(e.to_string()))?
            .len()
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        let edges = read_txn
            .open_table(EDGES)
            .map_err(|e| KernelError::Storage(e.to_string()))?
            .len()
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        Ok((vertices, edges))
    }

    /// Read one stored vertex back by content hash.
    pub fn load_vertex(&self, hash: &str) -> Result<Option<Vertex>, KernelError> {
        let read_txn = self
            .db()?
            .begin_read()
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(VERTICES)
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        let Some(bytes) = table
            .get(hash)
            .map_err(|e| KernelError::Storage(e.to_string()))?
        else {
            return Ok(None);
        };
        let stored: StoredVertex = postcard::from_bytes(bytes.value())?;
        let mut vertex = match stored.fixed_hash {
            Some(fixed) => Vertex::with_fixed_hash(fixed),
            None => Vertex::new(),
        };
        vertex.add_annotations(&stored.annotations);
        Ok(Some(vertex))
    }

    fn write_staged(&mut self) -> Result<(), KernelError> {
        if self.staged() == 0 {
            return Ok(());
        }
        // Staged records survive a failed write and go out with the next flush.
        let db = self.db()?;
        let write_txn = db
            .begin_write()
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        {
            let mut vertex_table = write_txn
                .open_table(VERTICES)
                .map_err(|e| KernelError::Storage(e.to_string()))?;
            for (key, bytes) in &self.staged_vertices {
                vertex_table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| KernelError::Storage(e.to_string()))?;
            }
            let mut edge_table = write_txn
                .open_table(EDGES)
                .map_err(|e| KernelError::Storage(e.to_string()))?;
            for (key, bytes) in &self.staged_edges {
                edge_table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| KernelError::Storage(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| KernelError::Storage(e.to_string()))?;

        tracing::debug!(
            vertices = self.staged_vertices.len(),
            edges = self.staged_edges.len(),
            "redb transaction committed"
        );
        self.staged_vertices.clear();
        self.staged_edges.clear();
        Ok(())
    }

    fn stage_limit_reached(&mut self) -> Result<(), KernelError> {
        if self.staged() >= STAGE_LIMIT {
            self.write_staged()?;
        }
        Ok(())
    }
}

impl Storage for RedbStorage {
    fn initialize(&mut self, arguments: &str) -> Result<(), KernelError> {
        let map = args::parse_key_values(arguments)?;
        let path = PathBuf::from(args::require(&map, "path")?);

        let db = Database::create(&path).map_err(|e| KernelError::Storage(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| KernelError::Storage(e.to_string()))?;
            let _ = write_txn
                .open_table(VERTICES)
                .map_err(|e| KernelError::Storage(e.to_string()))?;
            let _ = write_txn
                .open_table(EDGES)
                .map_err(|e| KernelError::Storage(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| KernelError::Storage(e.to_string()))?;
        }

        tracing::info!(path = %path.display(), "redb storage opened");
        self.path = Some(path);
        self.db = Some(db);
        Ok(())
    }

    fn commit_vertex(&mut self, vertex: &Vertex) -> Result<(), KernelError> {
        let stored = StoredVertex {
            annotations: vertex.annotations().clone(),
            fixed_hash: vertex.fixed_hash().map(str::to_string),
        };
        self.staged_vertices
            .push((vertex.content_hash(), postcard::to_allocvec(&stored)?));
        self.stage_limit_reached()
    }

    fn commit_edge(&mut self, edge: &Edge) -> Result<(), KernelError> {
        let (child, parent) = edge.endpoints().ok_or_else(|| {
            KernelError::InvalidElement("edge is missing an endpoint".to_string())
        })?;
        let stored = StoredEdge {
            child: child.content_hash(),
            parent: parent.content_hash(),
            annotations: edge.annotations().clone(),
        };
        let key = format!("{}:{}:{}", stored.child, stored.parent, edge.content_hash());
        self.staged_edges
            .push((key, postcard::to_allocvec(&stored)?));
        self.stage_limit_reached()
    }

    fn flush_transactions(&mut self) -> Result<(), KernelError> {
        self.write_staged()
    }

    fn shutdown(&mut self) -> bool {
        let flushed = match self.write_staged() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "redb storage lost staged commits on shutdown");
                false
            }
        };
        self.db = None;
        flushed
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_initialize_requires_path() {
        let mut storage = RedbStorage::new();
        assert!(storage.initialize("").is_err());
        assert!(storage.initialize("file=/tmp/x").is_err());
    }

    #[test]
    fn test_initialize_fails_for_missing_directory() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("prov.redb");
        let mut storage = RedbStorage::new();
        assert!(
            storage
                .initialize(&format!("path={}", path.display()))
                .is_err()
        );
    }

    #[test]
    fn test_commits_are_staged_until_flush() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("prov.redb");
        let mut storage = RedbStorage::new();
        storage
            .initialize(&format!("path={}", path.display()))
            .expect("init");

        let a = Arc::new(Vertex::new().with("pid", "1"));
        let b = Arc::new(Vertex::new().with("pid", "2"));
        storage.commit_vertex(&a).expect("vertex");
        storage.commit_vertex(&b).expect("vertex");
        storage
            .commit_edge(&Edge::new(Arc::clone(&b), Arc::clone(&a)))
            .expect("edge");
        assert_eq!(storage.stored_counts().expect("counts"), (0, 0));

        storage.flush_transactions().expect("flush");
        assert_eq!(storage.stored_counts().expect("counts"), (2, 1));

        let loaded = storage
            .load_vertex(&a.content_hash())
            .expect("load")
            .expect("present");
        assert_eq!(loaded, *a);
    }

    #[test]
    fn test_failed_write_keeps_staged_records() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("prov.redb");
        let mut storage = RedbStorage::new();
        storage
            .initialize(&format!("path={}", path.display()))
            .expect("init");

        let a = Arc::new(Vertex::new().with("pid", "1"));
        let b = Arc::new(Vertex::new().with("pid", "2"));
        storage.commit_vertex(&a).expect("vertex");
        storage
            .commit_edge(&Edge::new(Arc::clone(&b), Arc::clone(&a)))
            .expect("edge");

        // Close the database under the storage so the write fails.
        storage.db = None;
        assert!(storage.flush_transactions().is_err());
        assert_eq!(storage.staged(), 2);

        storage.db = Some(Database::open(&path).expect("reopen"));
        storage.flush_transactions().expect("flush");
        assert_eq!(storage.staged(), 0);
        assert_eq!(storage.stored_counts().expect("counts"), (1, 1));
    }

    #[test]
    fn test_reference_vertex_keeps_fixed_hash() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("prov.redb");
        let mut storage = RedbStorage::new();
        storage
            .initialize(&format!("path={}", path.display()))
            .expect("init");

        let v = Vertex::with_fixed_hash("remote-1").with("host", "h2");
        storage.commit_vertex(&v).expect("vertex");
        storage.flush_transactions().expect("flush");

        let loaded = storage
            .load_vertex("remote-1")
            .expect("load")
            .expect("present");
        assert!(loaded.is_reference());
        assert_eq!(loaded.content_hash(), "remote-1");
    }

    #[test]
    fn test_shutdown_writes_staged() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("prov.redb");
        {
            let mut storage = RedbStorage::new();
            storage
                .initialize(&format!("path={}", path.display()))
                .expect("init");
            storage
                .commit_vertex(&Vertex::new().with("pid", "7"))
                .expect("vertex");
            assert!(storage.shutdown());
        }
        let mut reopened = RedbStorage::new();
        reopened
            .initialize(&format!("path={}", path.display()))
            .expect("init");
        assert_eq!(reopened.stored_counts().expect("counts"), (1, 0));
    }
}
