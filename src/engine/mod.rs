//! Storage engine adapters.
//!
//! The browsing layer never talks to a concrete engine directly.
//! [`StoreEngine`] is the read-only seam it scans and reads through;
//! [`EngineOpener`] turns a connection location into one.

#[cfg(feature = "kv")]
mod fjall_engine;
mod memory;

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;

#[cfg(feature = "kv")]
pub use fjall_engine::{DEFAULT_KEYSPACE, FjallEngine, FjallOpener};
pub use memory::{MemoryEngine, MemoryOpener};

/// Advisory numbers gathered before a scan, used only for progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexEstimate {
    /// Approximate key count; may be stale or missing.
    pub total_keys_estimate: Option<u64>,
    /// First key in store order, in display form.
    pub first_key: Option<String>,
}

impl IndexEstimate {
    /// One-line summary shown before a scan starts.
    pub fn summary(&self) -> String {
        match (self.total_keys_estimate, &self.first_key) {
            (Some(n), Some(first)) => format!("~{} keys, first key '{}'", n, first),
            (Some(n), None) => format!("~{} keys", n),
            (None, Some(first)) => format!("unknown key count, first key '{}'", first),
            (None, None) => "empty or unknown".to_string(),
        }
    }
}

/// Read-only view of an ordered key-value store.
///
/// Implementations must be usable from blocking worker threads.
pub trait StoreEngine: Send + Sync {
    /// Cheap estimate of the key count plus the first key.
    fn estimate(&self) -> Result<IndexEstimate>;

    /// Visit every key in store order.
    ///
    /// The visitor returns [`ControlFlow::Break`] to stop; the engine must
    /// release its iterator as soon as that happens. An `Err` means the
    /// iteration itself failed after the keys already visited.
    fn visit_keys(&self, visitor: &mut dyn FnMut(&[u8]) -> ControlFlow<()>) -> Result<()>;

    /// Point lookup of the full value for a raw key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Size of the value stored under a raw key.
    fn value_len(&self, key: &[u8]) -> Result<Option<u64>> {
        Ok(self.get(key)?.map(|value| value.len() as u64))
    }
}

/// Opens a [`StoreEngine`] for a connection location.
pub trait EngineOpener: Send + Sync {
    fn open(&self, location: &Path) -> Result<Arc<dyn StoreEngine>>;
}
