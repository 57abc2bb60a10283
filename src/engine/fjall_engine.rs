//! Storage adapter for fjall databases.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use fjall::{Keyspace, KeyspaceCreateOptions};

use crate::error::{Error, Result};
use crate::key::display_key;
use crate::logging::{debug, error, info, trace};

use super::{EngineOpener, IndexEstimate, StoreEngine};

/// Keyspace browsed when none is configured.
pub const DEFAULT_KEYSPACE: &str = "default";

/// File fjall writes at the root of every database it creates.
const VERSION_MARKER: &str = "version";

/// A fjall database opened for browsing one keyspace.
///
/// The layer only reads. Directories without a fjall database and missing
/// keyspaces are rejected instead of being created.
pub struct FjallEngine {
    // Held so the database stays open as long as the keyspace is in use.
    _db: fjall::Database,
    keyspace: Keyspace,
}

impl FjallEngine {
    /// Open the database at `path` and select `keyspace`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use kvscope::engine::FjallEngine;
    ///
    /// let engine = FjallEngine::open("/var/lib/app/db", "default")?;
    /// ```
    pub fn open(path: impl AsRef<Path>, keyspace: &str) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), keyspace = keyspace, "opening fjall database");

        if !path.is_dir() {
            error!(path = %path.display(), "store location is not a directory");
            return Err(Error::invalid_input(format!(
                "store location '{}' is not an existing directory",
                path.display()
            )));
        }
        // fjall initializes any directory it is pointed at; only open ones it
        // already owns.
        if !path.join(VERSION_MARKER).is_file() {
            error!(path = %path.display(), "store location holds no fjall database");
            return Err(Error::invalid_input(format!(
                "store location '{}' is not a fjall database (no '{}' marker)",
                path.display(),
                VERSION_MARKER
            )));
        }

        let db = fjall::Database::builder(path)
            .open()
            .map_err(|e| open_error(path, e))?;
        if !db.keyspace_exists(keyspace) {
            error!(path = %path.display(), keyspace = keyspace, "keyspace does not exist");
            return Err(Error::KeyspaceNotFound {
                location: path.display().to_string(),
                keyspace: keyspace.to_string(),
            });
        }
        let ks = db
            .keyspace(keyspace, KeyspaceCreateOptions::default)
            .map_err(Error::engine)?;

        info!(path = %path.display(), keyspace = keyspace, "fjall database opened");
        Ok(Self { _db: db, keyspace: ks })
    }
}

/// Turn a lock conflict into a message the operator can act on.
fn open_error(path: &Path, err: fjall::Error) -> Error {
    let detail = err.to_string();
    let lowered = detail.to_lowercase();
    if lowered.contains("lock") || lowered.contains("temporarily unavailable") {
        error!(path = %path.display(), error = %detail, "database is locked");
        return Error::engine_msg(format!(
            "database at '{}' is locked by another process; close it and try again ({})",
            path.display(),
            detail
        ));
    }
    Error::engine(err)
}

impl StoreEngine for FjallEngine {
    fn estimate(&self) -> Result<IndexEstimate> {
        let total = self.keyspace.approximate_len() as u64;

        let first_key = match self.keyspace.iter().next() {
            Some(guard) => {
                let key = guard.key().map_err(Error::engine)?;
                let key: &[u8] = &key;
                Some(display_key(key))
            }
            None => None,
        };

        trace!(total_keys_estimate = total, "fjall estimate");
        Ok(IndexEstimate {
            total_keys_estimate: Some(total),
            first_key,
        })
    }

    fn visit_keys(&self, visitor: &mut dyn FnMut(&[u8]) -> ControlFlow<()>) -> Result<()> {
        for guard in self.keyspace.iter() {
            let key = guard.key().map_err(Error::engine)?;
            let key: &[u8] = &key;
            if visitor(key).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.keyspace.get(key).map_err(Error::engine)?;
        Ok(value.map(|v| v.to_vec()))
    }
}

/// Opens fjall databases, always browsing the same keyspace.
#[derive(Debug, Clone)]
pub struct FjallOpener {
    keyspace: String,
}

impl FjallOpener {
    pub fn new(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
        }
    }
}

impl Default for FjallOpener {
    fn default() -> Self {
        Self::new(DEFAULT_KEYSPACE)
    }
}

impl EngineOpener for FjallOpener {
    fn open(&self, location: &Path) -> Result<Arc<dyn StoreEngine>> {
        let engine = FjallEngine::open(location, &self.keyspace)?;
        Ok(Arc::new(engine))
    }
}
