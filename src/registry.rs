//! Named store connections and their persistence.
//!
//! The registry maps unique connection names to store locations. Every
//! mutation is validated first, applied under the write lock, persisted, and
//! rolled back if persisting fails.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::{debug, info, warn};

/// A registered store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    pub location: String,
}

impl Connection {
    pub fn location_path(&self) -> &Path {
        Path::new(&self.location)
    }
}

/// On-disk document holding every connection in registration order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    connections: Vec<Connection>,
}

/// Where the registry keeps its connections between runs.
pub trait RegistryStore: Send + Sync {
    fn load(&self) -> Result<Vec<Connection>>;
    fn save(&self, connections: &[Connection]) -> Result<()>;
}

/// JSON file store, written atomically through a sibling temp file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Connection>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no registry file yet");
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let document: RegistryDocument = serde_json::from_str(&content).map_err(|e| {
            Error::Registry(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        Ok(document.connections)
    }

    fn save(&self, connections: &[Connection]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let document = RegistryDocument {
            connections: connections.to_vec(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| Error::Registry(format!("failed to serialize connections: {}", e)))?;

        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), count = connections.len(), "registry saved");
        Ok(())
    }
}

/// Store that keeps the last saved state in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<Connection>>,
    fail_saves: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously saved connections.
    pub fn with_connections(connections: Vec<Connection>) -> Self {
        Self {
            saved: Mutex::new(connections),
            fail_saves: Mutex::new(false),
        }
    }

    /// Make subsequent saves fail, to exercise rollback.
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }

    pub fn saved(&self) -> Vec<Connection> {
        self.saved.lock().clone()
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<Vec<Connection>> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, connections: &[Connection]) -> Result<()> {
        if *self.fail_saves.lock() {
            return Err(Error::Registry("save rejected".into()));
        }
        *self.saved.lock() = connections.to_vec();
        Ok(())
    }
}

impl<S: RegistryStore + ?Sized> RegistryStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Vec<Connection>> {
        (**self).load()
    }

    fn save(&self, connections: &[Connection]) -> Result<()> {
        (**self).save(connections)
    }
}

/// Registered connections, in registration order.
pub struct ConnectionRegistry {
    connections: RwLock<Vec<Connection>>,
    store: Box<dyn RegistryStore>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &*self.connections.read())
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Load the registry from `store`.
    ///
    /// Persisted entries are checked like new ones; a document holding
    /// duplicate or empty names is rejected rather than silently repaired.
    pub fn load(store: impl RegistryStore + 'static) -> Result<Self> {
        let loaded = store.load()?;
        let mut connections: Vec<Connection> = Vec::with_capacity(loaded.len());
        for conn in loaded {
            let name = validate(&conn.name, &conn.location)
                .map_err(|e| Error::Registry(format!("invalid stored connection: {}", e)))?;
            if connections.iter().any(|c| c.name == name) {
                return Err(Error::Registry(format!(
                    "duplicate stored connection '{}'",
                    name
                )));
            }
            connections.push(Connection {
                name,
                location: conn.location,
            });
        }
        info!(count = connections.len(), "connection registry loaded");
        Ok(Self {
            connections: RwLock::new(connections),
            store: Box::new(store),
        })
    }

    /// An empty registry that is never persisted beyond memory.
    pub fn in_memory() -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            store: Box::new(MemoryStore::new()),
        }
    }

    /// Register a new connection.
    pub fn add(&self, name: &str, location: &str) -> Result<Connection> {
        let name = validate(name, location)?;
        let mut connections = self.connections.write();
        if connections.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateName(name));
        }

        let conn = Connection {
            name,
            location: location.to_string(),
        };
        connections.push(conn.clone());
        if let Err(e) = self.store.save(&connections) {
            connections.pop();
            warn!(name = %conn.name, error = %e, "add rolled back");
            return Err(e);
        }
        info!(name = %conn.name, location = %conn.location, "connection added");
        Ok(conn)
    }

    /// Rename and/or relocate a connection. `new_name` may equal `old_name`.
    pub fn update(&self, old_name: &str, new_name: &str, location: &str) -> Result<Connection> {
        let old_name = old_name.trim();
        let new_name = validate(new_name, location)?;
        let mut connections = self.connections.write();
        let position = connections
            .iter()
            .position(|c| c.name == old_name)
            .ok_or_else(|| Error::ConnectionNotFound(old_name.to_string()))?;
        if new_name != old_name && connections.iter().any(|c| c.name == new_name) {
            return Err(Error::DuplicateName(new_name));
        }

        let replacement = Connection {
            name: new_name,
            location: location.to_string(),
        };
        let slot = connections
            .get_mut(position)
            .ok_or_else(|| Error::ConnectionNotFound(old_name.to_string()))?;
        let previous = std::mem::replace(slot, replacement.clone());

        if let Err(e) = self.store.save(&connections) {
            if let Some(slot) = connections.get_mut(position) {
                *slot = previous;
            }
            warn!(name = %old_name, error = %e, "update rolled back");
            return Err(e);
        }
        info!(
            old_name = %previous.name,
            new_name = %replacement.name,
            location = %replacement.location,
            "connection updated"
        );
        Ok(replacement)
    }

    /// Forget a connection.
    pub fn remove(&self, name: &str) -> Result<Connection> {
        let name = name.trim();
        let mut connections = self.connections.write();
        let position = connections
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::ConnectionNotFound(name.to_string()))?;
        let removed = connections.remove(position);

        if let Err(e) = self.store.save(&connections) {
            connections.insert(position, removed);
            warn!(name = %name, error = %e, "remove rolled back");
            return Err(e);
        }
        info!(name = %name, "connection removed");
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Result<Connection> {
        let name = name.trim();
        self.connections
            .read()
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| Error::ConnectionNotFound(name.to_string()))
    }

    /// Connection names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.connections
            .read()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Name to location mapping.
    pub fn locations(&self) -> BTreeMap<String, String> {
        self.connections
            .read()
            .iter()
            .map(|c| (c.name.clone(), c.location.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

/// Check a name/location pair and return the trimmed name.
fn validate(name: &str, location: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid_input("connection name must not be empty"));
    }
    if location.trim().is_empty() {
        return Err(Error::invalid_input("connection location must not be empty"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_add_and_list_in_order() {
        let registry = ConnectionRegistry::in_memory();
        registry.add("main", "/data/main").unwrap();
        registry.add("archive", "/data/archive").unwrap();

        assert_eq!(registry.list(), vec!["main", "archive"]);
        assert_eq!(
            registry.locations().get("archive").map(String::as_str),
            Some("/data/archive")
        );
    }

    #[test]
    fn test_duplicate_add_keeps_original() {
        let registry = ConnectionRegistry::in_memory();
        registry.add("main", "/a").unwrap();
        let err = registry.add("main", "/b").unwrap_err();
        assert!(matches!(err, Error::DuplicateName(ref n) if n == "main"));
        assert_eq!(registry.get("main").unwrap().location, "/a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_are_case_sensitive_and_trimmed() {
        let registry = ConnectionRegistry::in_memory();
        registry.add("  Main ", "/a").unwrap();
        registry.add("main", "/b").unwrap();
        assert_eq!(registry.list(), vec!["Main", "main"]);
        assert!(matches!(
            registry.add("Main", "/c"),
            Err(Error::DuplicateName(_))
        ));
    }

    #[test]
    fn test_empty_input_rejected() {
        let registry = ConnectionRegistry::in_memory();
        assert!(matches!(registry.add("", "/a"), Err(Error::InvalidInput(_))));
        assert!(matches!(registry.add("x", "  "), Err(Error::InvalidInput(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_rename() {
        let registry = ConnectionRegistry::in_memory();
        registry.add("a", "/p").unwrap();
        registry.update("a", "b", "/q").unwrap();

        assert_eq!(registry.list(), vec!["b"]);
        assert_eq!(registry.get("b").unwrap().location, "/q");
        assert!(registry.get("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_same_name_relocates() {
        let registry = ConnectionRegistry::in_memory();
        registry.add("a", "/p").unwrap();
        let updated = registry.update("a", "a", "/q").unwrap();
        assert_eq!(updated.location, "/q");
        assert_eq!(registry.get("a").unwrap().location, "/q");
    }

    #[test]
    fn test_lookups_trim_like_add() {
        let registry = ConnectionRegistry::in_memory();
        registry.add(" main ", "/p").unwrap();

        assert_eq!(registry.get("main ").unwrap().location, "/p");
        let updated = registry.update(" main", "main", "/q").unwrap();
        assert_eq!(updated.name, "main");
        assert_eq!(registry.get(" main").unwrap().location, "/q");

        let removed = registry.remove("  main  ").unwrap();
        assert_eq!(removed.name, "main");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_errors() {
        let registry = ConnectionRegistry::in_memory();
        registry.add("a", "/p").unwrap();
        registry.add("b", "/q").unwrap();

        assert!(matches!(
            registry.update("missing", "c", "/r"),
            Err(Error::ConnectionNotFound(_))
        ));
        assert!(matches!(
            registry.update("a", "b", "/r"),
            Err(Error::DuplicateName(_))
        ));
        assert!(matches!(
            registry.update("a", "", "/r"),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(registry.list(), vec!["a", "b"]);
    }

    #[test]
    fn test_failed_persist_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let registry = ConnectionRegistry::load(store.clone()).unwrap();
        registry.add("a", "/p").unwrap();

        store.set_fail_saves(true);
        assert!(registry.add("b", "/q").is_err());
        assert!(registry.update("a", "c", "/r").is_err());
        assert!(registry.remove("a").is_err());

        assert_eq!(registry.list(), vec!["a"]);
        assert_eq!(registry.get("a").unwrap().location, "/p");
        assert_eq!(store.saved().len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = ConnectionRegistry::in_memory();
        registry.add("a", "/p").unwrap();
        registry.add("b", "/q").unwrap();
        registry.remove("a").unwrap();
        assert_eq!(registry.list(), vec!["b"]);
        assert!(registry.remove("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("connections.json");
        let odd_location = "/data/with space/ünïcode/../store";

        {
            let registry = ConnectionRegistry::load(JsonFileStore::new(&path)).unwrap();
            registry.add("main", odd_location).unwrap();
            registry.add("second", "relative/dir").unwrap();
        }

        let reloaded = ConnectionRegistry::load(JsonFileStore::new(&path)).unwrap();
        assert_eq!(reloaded.list(), vec!["main", "second"]);
        assert_eq!(reloaded.get("main").unwrap().location, odd_location);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["connections"][1]["name"], "second");
    }

    #[test]
    fn test_load_rejects_duplicates() {
        let store = MemoryStore::with_connections(vec![
            Connection {
                name: "a".into(),
                location: "/p".into(),
            },
            Connection {
                name: "a".into(),
                location: "/q".into(),
            },
        ]);
        assert!(matches!(
            ConnectionRegistry::load(store),
            Err(Error::Registry(_))
        ));
    }
}
