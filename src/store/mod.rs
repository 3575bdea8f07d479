//! Persistence of flowsheet graph documents.
//!
//! The server keeps one saved graph document per flowsheet: the merged
//! snapshot including the user's layout. This module provides the storage
//! backends behind that document:
//! - `FileDataStore` - one JSON file per flowsheet (default)
//! - `MemoryDataStore` - in-process only, for saving-disabled sessions and
//!   tests
//!
//! plus `DataStoreManager`, which owns one store per registered flowsheet
//! id, and the versioned save-file naming used when a default save path
//! already exists (`name.json`, `name-1.json`, ... capped at
//! [`MAX_SAVED_VERSIONS`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::snapshot::FlowsheetGraph;
use crate::{Error, Result};

/// Maximum number of numbered versions of the same save file.
pub const MAX_SAVED_VERSIONS: usize = 100;

/// Trait for flowsheet graph document stores.
///
/// A store holds at most one document. Loading from a store that has never
/// been saved to returns `Error::NotFound`.
pub trait DataStore: Send {
    /// Persist the document, replacing any previous one.
    fn save(&mut self, graph: &FlowsheetGraph) -> Result<()>;

    /// Load the last saved document.
    fn load(&self) -> Result<FlowsheetGraph>;

    /// Storage location description (for display purposes).
    fn location(&self) -> String;
}

/// File-backed store: one pretty-printed JSON document per flowsheet.
#[derive(Debug)]
pub struct FileDataStore {
    path: PathBuf,
}

impl FileDataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataStore for FileDataStore {
    fn save(&mut self, graph: &FlowsheetGraph) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(graph)?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::Datastore(format!("write {}: {}", self.path.display(), e)))
    }

    fn load(&self) -> Result<FlowsheetGraph> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "no saved document at {}",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(Error::Datastore(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        // An empty file is what `overwrite` leaves behind before the first save
        if json.trim().is_empty() {
            return Err(Error::NotFound(format!(
                "empty save file {}",
                self.path.display()
            )));
        }
        serde_json::from_str(&json)
            .map_err(|e| Error::Datastore(format!("parse {}: {}", self.path.display(), e)))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process store used when saving is disabled.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    document: Option<FlowsheetGraph>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for MemoryDataStore {
    fn save(&mut self, graph: &FlowsheetGraph) -> Result<()> {
        self.document = Some(graph.clone());
        Ok(())
    }

    fn load(&self) -> Result<FlowsheetGraph> {
        self.document
            .clone()
            .ok_or_else(|| Error::NotFound("no document saved in memory store".into()))
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// One store per registered flowsheet id.
///
/// The manager is shared between the serving layer and the top-level API,
/// so stores sit behind a mutex; each save/load holds the lock for the
/// duration of the file operation, serializing writers per process.
pub struct DataStoreManager {
    stores: Mutex<HashMap<String, Box<dyn DataStore>>>,
}

impl DataStoreManager {
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the store for a flowsheet id.
    pub fn add(&self, id: impl Into<String>, store: Box<dyn DataStore>) {
        let mut stores = self.stores.lock().expect("store lock poisoned");
        stores.insert(id.into(), store);
    }

    pub fn contains(&self, id: &str) -> bool {
        let stores = self.stores.lock().expect("store lock poisoned");
        stores.contains_key(id)
    }

    /// Save a document through the store registered for `id`.
    pub fn save(&self, id: &str, graph: &FlowsheetGraph) -> Result<()> {
        let mut stores = self.stores.lock().expect("store lock poisoned");
        let store = stores
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("flowsheet '{}'", id)))?;
        store.save(graph)
    }

    /// Load the saved document for `id`.
    pub fn load(&self, id: &str) -> Result<FlowsheetGraph> {
        let stores = self.stores.lock().expect("store lock poisoned");
        let store = stores
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("flowsheet '{}'", id)))?;
        store.load()
    }

    /// Location description for the store registered for `id`.
    pub fn location(&self, id: &str) -> Option<String> {
        let stores = self.stores.lock().expect("store lock poisoned");
        stores.get(id).map(|s| s.location())
    }
}

impl Default for DataStoreManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the actual save path for a default-named save file.
///
/// - `overwrite` truncates an existing file and reuses its path.
/// - Otherwise an existing `name.json` becomes `name-1.json`, then
///   `name-2.json`, ... and the first free version is returned.
/// - More than [`MAX_SAVED_VERSIONS`] numbered files is an error.
pub fn versioned_save_path(name: &str, save_path: &Path, overwrite: bool) -> Result<PathBuf> {
    if overwrite {
        if save_path.exists() {
            tracing::warn!(path = %save_path.display(), "overwriting existing save file");
            std::fs::write(save_path, b"")?;
        }
        return Ok(save_path.to_path_buf());
    }
    if !save_path.exists() {
        return Ok(save_path.to_path_buf());
    }

    let save_dir = save_path.parent().unwrap_or_else(|| Path::new("."));
    let mut counter = 0;
    let mut candidate = save_path.to_path_buf();
    while candidate.exists() && counter < MAX_SAVED_VERSIONS {
        counter += 1;
        candidate = save_dir.join(format!("{}-{}.json", name, counter));
    }
    if counter == MAX_SAVED_VERSIONS && candidate.exists() {
        return Err(Error::Datastore(format!(
            "found {} numbered save files of form '{}-<num>.json'; refusing to create more",
            MAX_SAVED_VERSIONS, name
        )));
    }
    tracing::info!(path = %candidate.display(), "created new version for save file");
    Ok(candidate)
}
