// store.rs — Persisted graphs and their provenance
//
// Graphs are stored as JSON documents, one per graph, keyed by graph name.
// The fingerprint of a graph is the SHA-256 of its compact JSON form; the
// emitter stamps it on compiled units and the façade compares it to detect
// native types compiled from stale graph data.
//
// Preconditions: graph names are identifiers (validation enforces this).
// Postconditions: `load(save(g)) == g`.
// Failure modes: missing graphs, invalid names, I/O errors, malformed JSON.
// Side effects: `DirectoryStore` reads and writes files under its root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::graph::Graph;

const EXTENSION: &str = ".graph.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("graph '{0}' not found")]
    NotFound(String),
    #[error("'{0}' is not a storable graph name")]
    InvalidName(String),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: malformed graph: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait GraphStore {
    fn load(&self, name: &str) -> Result<Graph, StoreError>;
    fn save(&mut self, graph: &Graph) -> Result<(), StoreError>;
    /// Stored graph names, sorted.
    fn names(&self) -> Result<Vec<String>, StoreError>;
}

/// Hex SHA-256 of the graph's compact JSON, streamed into the hasher.
///
/// Graph records derive `Serialize` and hold no maps, so serialization does
/// not fail. If it ever does, the debug rendering is hashed instead: distinct
/// graphs must never share a fingerprint.
pub fn fingerprint(graph: &Graph) -> String {
    let mut hasher = Sha256::new();
    if let Err(err) = serde_json::to_writer(&mut hasher, graph) {
        debug!(graph = %graph.name, %err, "fingerprinting debug rendering");
        hasher = Sha256::new();
        hasher.update(format!("{graph:?}").as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Read one graph document from `path`.
pub fn load_file(path: &Path) -> Result<Graph, StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn check_name(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

// ── Directory store ──────────────────────────────────────────────────────

/// `<root>/<name>.graph.json`, pretty-printed.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{EXTENSION}"))
    }
}

impl GraphStore for DirectoryStore {
    fn load(&self, name: &str) -> Result<Graph, StoreError> {
        check_name(name)?;
        let path = self.path_of(name);
        if !path.exists() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        load_file(&path)
    }

    fn save(&mut self, graph: &Graph) -> Result<(), StoreError> {
        check_name(&graph.name)?;
        let path = self.path_of(&graph.name);
        let text = serde_json::to_string_pretty(graph).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        fs::write(&path, text).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(graph = %graph.name, path = %path.display(), "graph saved");
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(EXTENSION)) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

// ── Memory store ─────────────────────────────────────────────────────────

/// Keeps serialized documents, so loads return fresh copies exactly as a
/// file round trip would.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Graph, StoreError> {
        let text = self
            .documents
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        serde_json::from_str(text).map_err(|source| StoreError::Json {
            path: PathBuf::from(name),
            source,
        })
    }

    fn save(&mut self, graph: &Graph) -> Result<(), StoreError> {
        check_name(&graph.name)?;
        let text = serde_json::to_string(graph).map_err(|source| StoreError::Json {
            path: PathBuf::from(&graph.name),
            source,
        })?;
        self.documents.insert(graph.name.clone(), text);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.documents.keys().cloned().collect())
    }
}
