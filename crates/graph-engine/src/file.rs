//! JSON-file backed engine.
//!
//! The whole element set is kept in memory and rewritten to disk after every
//! successful apply. The document is written to a sibling temp file, synced,
//! and renamed into place, so a crash leaves either the old or the new
//! document. Each document carries a BLAKE3 hash of its elements which is
//! verified on open.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use graph_core::{Element, ElementId, Operation, ReadPredicate};

use crate::engine::{Engine, EngineError};
use crate::memory::MemoryEngine;

const FORMAT_VERSION: u32 = 1;

/// On-disk layout.
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    content_hash: String,
    elements: Vec<Element>,
}

/// Compute the BLAKE3 hash (hex) of an element list.
pub fn content_hash(elements: &[Element]) -> Result<String, EngineError> {
    let bytes = serde_json::to_vec(elements)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Durable engine storing all elements in a single JSON document.
#[derive(Debug)]
pub struct FileEngine {
    path: PathBuf,
    memory: MemoryEngine,
}

impl FileEngine {
    /// Open the store at `path`, creating parent directories. A missing file
    /// is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let elements = if path.exists() {
            load_document(&path)?
        } else {
            Vec::new()
        };

        tracing::info!(
            path = %path.display(),
            elements = elements.len(),
            "File engine opened"
        );

        Ok(Self {
            path,
            memory: MemoryEngine::from_elements(elements),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored elements in read order.
    pub fn export(&self) -> Result<Vec<Element>, EngineError> {
        self.memory.export()
    }

    pub fn len(&self) -> Result<usize, EngineError> {
        self.memory.len()
    }

    pub fn is_empty(&self) -> Result<bool, EngineError> {
        self.memory.is_empty()
    }
}

impl Engine for FileEngine {
    fn apply(&self, operations: &[Operation]) -> Result<(), EngineError> {
        self.memory
            .apply_then(operations, |elements| write_document(&self.path, elements))?;
        tracing::debug!(
            path = %self.path.display(),
            ops = operations.len(),
            "File engine persisted operations"
        );
        Ok(())
    }

    fn read(&self, predicate: &ReadPredicate) -> Result<Vec<Element>, EngineError> {
        self.memory.read(predicate)
    }

    fn get(&self, id: ElementId) -> Result<Option<Element>, EngineError> {
        self.memory.get(id)
    }
}

fn load_document(path: &Path) -> Result<Vec<Element>, EngineError> {
    let json = fs::read_to_string(path)?;
    let document: StoreDocument = serde_json::from_str(&json)?;

    if document.version != FORMAT_VERSION {
        return Err(EngineError::Unavailable(format!(
            "unsupported store format version {}",
            document.version
        )));
    }
    if content_hash(&document.elements)? != document.content_hash {
        return Err(EngineError::Integrity {
            path: path.display().to_string(),
        });
    }

    Ok(document.elements)
}

fn write_document(path: &Path, elements: &[Element]) -> Result<(), EngineError> {
    let document = StoreDocument {
        version: FORMAT_VERSION,
        content_hash: content_hash(elements)?,
        elements: elements.to_vec(),
    };
    let json = serde_json::to_string_pretty(&document)?;

    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// `graph.json` -> `graph.json.tmp`, so stores sharing a stem never share a
/// temp file.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
