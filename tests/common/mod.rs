//! Common test utilities and fixtures.
//!
//! This module provides shared sample data and a test application wrapper
//! so the HTTP tests don't repeat their setup.

#![cfg(feature = "server")]

use std::path::Path;
use std::sync::Arc;

use axum_test::TestServer;
use kvscope::server::{AppState, router};
use kvscope::{
    ConnectionRegistry, JsonFileStore, MemoryEngine, MemoryOpener, Session, SessionOptions,
};
use tempfile::TempDir;

// =============================================================================
// Sample Data
// =============================================================================

/// Location the sample store is mounted at.
pub const MAIN_LOCATION: &str = "/stores/main";

/// A value above the 1 MiB display threshold.
pub const LARGE_VALUE_LEN: usize = 2 * 1024 * 1024;

/// Entries of the sample store: grouped keys, an ungrouped key, JSON, text,
/// binary, a non-printable key and one large value.
pub fn sample_entries() -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![
        (b"acct/1".to_vec(), br#"{"a":1}"#.to_vec()),
        (b"acct/2".to_vec(), b"hello world".to_vec()),
        (b"block/9".to_vec(), vec![0xde, 0xad, 0xbe, 0xef]),
        (b"config".to_vec(), br#"{"version":3,"tags":["x","y"]}"#.to_vec()),
        (b"blob/large".to_vec(), vec![b'z'; LARGE_VALUE_LEN]),
        (vec![0x00, 0xff], b"binary key".to_vec()),
    ]
}

// =============================================================================
// Test Application
// =============================================================================

/// Test application wrapper around an in-memory store and a temporary
/// connection registry file.
pub struct TestApp {
    pub server: TestServer,
    pub session: Session,
    pub engine: Arc<MemoryEngine>,
    pub opener: Arc<MemoryOpener>,
    temp_dir: TempDir,
}

impl TestApp {
    /// Create a test application with the sample store registered as `main`.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_engine(MemoryEngine::with_entries(sample_entries()))
    }

    /// Create a test application with `engine` registered as `main`.
    pub fn with_engine(engine: MemoryEngine) -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let engine = Arc::new(engine);
        let opener = Arc::new(MemoryOpener::new());
        opener.mount(MAIN_LOCATION, engine.clone());

        let registry = ConnectionRegistry::load(JsonFileStore::new(
            temp_dir.path().join("connections.json"),
        ))?;
        registry.add("main", MAIN_LOCATION)?;

        let session = Session::new(registry, opener.clone(), SessionOptions::default());
        let server = TestServer::new(router(AppState::new(session.clone())))?;
        Ok(Self {
            server,
            session,
            engine,
            opener,
            temp_dir,
        })
    }

    /// Scratch directory for export targets.
    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Percent-encode a key for use in a URL path, keeping '/' intact.
pub fn key_path(key: &str) -> String {
    urlencoding::encode(key).replace("%2F", "/")
}
