//! In-memory engine backed by a `BTreeMap`.
//!
//! Useful for embedders browsing synthetic data and for tests: it counts
//! point reads and can be told to fail a scan after a number of keys.

use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::key::display_key;

use super::{EngineOpener, IndexEstimate, StoreEngine};

/// Ordered in-memory store.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    reads: AtomicU64,
    keys_visited: AtomicU64,
    fail_scan_after: Option<u64>,
    estimate_override: Option<u64>,
}

impl MemoryEngine {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given entries.
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let engine = Self::new();
        for (key, value) in entries {
            engine.insert(key, value);
        }
        engine
    }

    /// Make every scan fail once `keys` keys have been visited.
    pub fn fail_scan_after(mut self, keys: u64) -> Self {
        self.fail_scan_after = Some(keys);
        self
    }

    /// Report a fixed (possibly wrong) key count estimate.
    pub fn with_estimate(mut self, estimate: u64) -> Self {
        self.estimate_override = Some(estimate);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.write().insert(key.into(), value.into());
    }

    /// Remove a value.
    pub fn remove(&self, key: &[u8]) {
        self.entries.write().remove(key);
    }

    /// Number of point lookups served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of keys handed to scan visitors so far.
    pub fn keys_visited(&self) -> u64 {
        self.keys_visited.load(Ordering::SeqCst)
    }
}

impl StoreEngine for MemoryEngine {
    fn estimate(&self) -> Result<IndexEstimate> {
        let entries = self.entries.read();
        Ok(IndexEstimate {
            total_keys_estimate: Some(self.estimate_override.unwrap_or(entries.len() as u64)),
            first_key: entries.keys().next().map(|key| display_key(key)),
        })
    }

    fn visit_keys(&self, visitor: &mut dyn FnMut(&[u8]) -> ControlFlow<()>) -> Result<()> {
        // Snapshot so visitors never run under the lock.
        let keys: Vec<Vec<u8>> = self.entries.read().keys().cloned().collect();

        for (position, key) in keys.iter().enumerate() {
            if let Some(limit) = self.fail_scan_after
                && position as u64 >= limit
            {
                return Err(Error::engine_msg(format!(
                    "simulated iterator failure after {} keys",
                    limit
                )));
            }
            self.keys_visited.fetch_add(1, Ordering::SeqCst);
            if visitor(key).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.read().get(key).cloned())
    }
}

/// Opener resolving locations to pre-registered in-memory engines.
#[derive(Default)]
pub struct MemoryOpener {
    engines: RwLock<HashMap<PathBuf, Arc<MemoryEngine>>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `engine` available at `location`.
    pub fn mount(&self, location: impl Into<PathBuf>, engine: Arc<MemoryEngine>) {
        self.engines.write().insert(location.into(), engine);
    }
}

impl EngineOpener for MemoryOpener {
    fn open(&self, location: &Path) -> Result<Arc<dyn StoreEngine>> {
        let engine: Arc<dyn StoreEngine> = self
            .engines
            .read()
            .get(location)
            .cloned()
            .map(|engine| engine as Arc<dyn StoreEngine>)
            .ok_or_else(|| {
                Error::invalid_input(format!("no store at '{}'", location.display()))
            })?;
        Ok(engine)
    }
}
