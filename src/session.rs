//! The browsing session.
//!
//! A [`Session`] owns everything that lives for as long as a user browses:
//! the connection registry, one opened engine per connection, the cached key
//! index of each connection, in-flight scans and the value cache. It is cheap
//! to clone and safe to share between tasks.
//!
//! Store work never runs on the async executor. It is dispatched with
//! `spawn_blocking` and can be abandoned through a [`CancellationToken`].
//!
//! # Example
//!
//! ```ignore
//! use kvscope::prelude::*;
//!
//! let session = Session::from_config(&Config::default())?;
//! session.add_connection("main", "/var/lib/app/db")?;
//!
//! let task = session.start_index("main", false).await?;
//! let mut progress = task.progress();
//! let index = task.wait().await?;
//! for prefix in index.prefixes() {
//!     println!("{} ({})", prefix.prefix, prefix.keys);
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "kv")]
use crate::config::Config;
use crate::cache::ValueCache;
use crate::engine::{EngineOpener, IndexEstimate, StoreEngine};
use crate::error::{Error, Result};
use crate::export::{self, ExportReport};
use crate::index::{self, IndexOptions, KeyIndex, ProgressReporter, ScanProgress};
use crate::logging::{debug, info, warn};
#[cfg(feature = "kv")]
use crate::registry::JsonFileStore;
use crate::registry::{Connection, ConnectionRegistry};
use crate::value::{self, InspectLimits, ValueDescriptor};

/// Behavior knobs for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub index: IndexOptions,
    pub inspect: InspectLimits,
}

/// How a shared scan ended without producing an index.
#[derive(Debug, Clone)]
enum ScanAbort {
    Cancelled(String),
    Worker(String),
}

type ScanOutcome = std::result::Result<Arc<KeyIndex>, ScanAbort>;

/// Everything a caller needs to observe a scan.
#[derive(Debug, Clone)]
struct ScanHandle {
    id: u64,
    progress: watch::Receiver<ScanProgress>,
    outcome: watch::Receiver<Option<ScanOutcome>>,
    cancel: CancellationToken,
}

/// A running (or already finished) key scan.
///
/// Every caller that asks for the same connection's index while a scan is
/// running gets a task for that one scan. Cancelling any of them cancels the
/// scan for all.
#[derive(Debug, Clone)]
pub struct IndexTask {
    connection: String,
    handle: ScanHandle,
}

impl IndexTask {
    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Progress updates for this scan.
    pub fn progress(&self) -> watch::Receiver<ScanProgress> {
        self.handle.progress.clone()
    }

    /// Latest progress snapshot.
    pub fn current(&self) -> ScanProgress {
        *self.handle.progress.borrow()
    }

    pub fn cancel(&self) {
        self.handle.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.outcome.borrow().is_some()
    }

    /// Wait for the scan to end.
    pub async fn wait(mut self) -> Result<Arc<KeyIndex>> {
        let outcome = self
            .handle
            .outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Worker(format!("scan of '{}' vanished", self.connection)))?
            .clone();
        match outcome {
            Some(Ok(index)) => Ok(index),
            Some(Err(ScanAbort::Cancelled(msg))) => Err(Error::Cancelled(msg)),
            Some(Err(ScanAbort::Worker(msg))) => Err(Error::Worker(msg)),
            None => Err(Error::Worker(format!(
                "scan of '{}' ended without a result",
                self.connection
            ))),
        }
    }
}

/// Index state of one connection, for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub connection: String,
    /// Progress of the running scan, if any.
    pub scan: Option<ScanProgress>,
    /// Last complete (or partial) index.
    pub index: Option<Arc<KeyIndex>>,
}

struct Inner {
    registry: ConnectionRegistry,
    opener: Arc<dyn EngineOpener>,
    options: SessionOptions,
    engines: tokio::sync::Mutex<HashMap<String, Arc<dyn StoreEngine>>>,
    indexes: RwLock<HashMap<String, Arc<KeyIndex>>>,
    scans: Mutex<HashMap<String, ScanHandle>>,
    values: ValueCache,
    next_scan_id: AtomicU64,
    shutdown: CancellationToken,
}

/// Shared, cloneable browsing session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.inner.registry)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        registry: ConnectionRegistry,
        opener: Arc<dyn EngineOpener>,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                opener,
                options,
                engines: tokio::sync::Mutex::new(HashMap::new()),
                indexes: RwLock::new(HashMap::new()),
                scans: Mutex::new(HashMap::new()),
                values: ValueCache::new(),
                next_scan_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Session over fjall databases with a JSON connection file, as
    /// described by `config`.
    #[cfg(feature = "kv")]
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let registry = ConnectionRegistry::load(JsonFileStore::new(&config.registry.path))?;
        let opener = Arc::new(crate::engine::FjallOpener::new(&config.store.keyspace));
        let options = SessionOptions {
            index: config.index_options()?,
            inspect: config.inspect,
        };
        Ok(Self::new(registry, opener, options))
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn value_cache(&self) -> &ValueCache {
        &self.inner.values
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn list_connections(&self) -> Vec<String> {
        self.inner.registry.list()
    }

    pub fn connection_locations(&self) -> std::collections::BTreeMap<String, String> {
        self.inner.registry.locations()
    }

    pub fn connection(&self, name: &str) -> Result<Connection> {
        self.inner.registry.get(name)
    }

    pub fn add_connection(&self, name: &str, location: &str) -> Result<Connection> {
        self.inner.registry.add(name, location)
    }

    /// Rename and/or relocate a connection.
    ///
    /// Everything derived from the old connection is dropped: its engine
    /// handle, cached index, cached values and any running scan.
    pub async fn update_connection(
        &self,
        old_name: &str,
        new_name: &str,
        location: &str,
    ) -> Result<Connection> {
        let old_name = old_name.trim();
        let updated = self.inner.registry.update(old_name, new_name, location)?;
        self.forget(old_name).await;
        if updated.name != old_name {
            self.forget(&updated.name).await;
        }
        Ok(updated)
    }

    pub async fn remove_connection(&self, name: &str) -> Result<Connection> {
        let removed = self.inner.registry.remove(name)?;
        self.forget(&removed.name).await;
        Ok(removed)
    }

    /// Drop all state derived from a connection.
    async fn forget(&self, name: &str) {
        if let Some(handle) = self.inner.scans.lock().remove(name) {
            handle.cancel.cancel();
        }
        self.inner.indexes.write().remove(name);
        // The engine goes before the values: a fetch that still sees the old
        // generation after this point also held the old engine, and its
        // result is refused by the cache.
        let _had_engine = self.inner.engines.lock().await.remove(name).is_some();
        let _dropped = self.inner.values.invalidate_all(name);
        debug!(
            connection = name,
            cached_values = _dropped,
            had_engine = _had_engine,
            "connection state dropped"
        );
    }

    // ------------------------------------------------------------------
    // Engines
    // ------------------------------------------------------------------

    /// Opened engine for a connection, opening it on first use.
    async fn engine(&self, name: &str) -> Result<Arc<dyn StoreEngine>> {
        if self.is_shut_down() {
            return Err(Error::Cancelled("session is shut down".into()));
        }
        let mut engines = self.inner.engines.lock().await;
        if let Some(engine) = engines.get(name) {
            return Ok(engine.clone());
        }

        let conn = self.inner.registry.get(name)?;
        let opener = self.inner.opener.clone();
        let location = PathBuf::from(&conn.location);
        let engine = tokio::task::spawn_blocking(move || opener.open(&location))
            .await
            .map_err(|e| Error::Worker(format!("opening '{}' failed: {}", name, e)))??;

        info!(connection = name, location = %conn.location, "store opened");
        engines.insert(name.to_string(), engine.clone());
        Ok(engine)
    }

    /// Run store work on a blocking thread, abandoning it if `cancel` fires.
    async fn run_blocking<T, F>(&self, cancel: &CancellationToken, what: String, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(work);
        tokio::select! {
            joined = handle => joined.map_err(|e| Error::Worker(format!("{}: {}", what, e)))?,
            _ = cancel.cancelled() => Err(Error::Cancelled(what)),
            _ = self.inner.shutdown.cancelled() => Err(Error::Cancelled(what)),
        }
    }

    // ------------------------------------------------------------------
    // Key index
    // ------------------------------------------------------------------

    /// Cheap upfront numbers used to decide whether to start a scan.
    pub async fn index_estimate(&self, name: &str) -> Result<IndexEstimate> {
        let engine = self.engine(name).await?;
        self.run_blocking(
            &CancellationToken::new(),
            format!("estimate of '{}'", name),
            move || engine.estimate(),
        )
        .await
    }

    /// Start a key scan, or join the one already running.
    ///
    /// Unless `refresh` is set, a cached index is returned as an already
    /// finished task without touching the store.
    pub async fn start_index(&self, name: &str, refresh: bool) -> Result<IndexTask> {
        if !refresh && let Some(index) = self.cached_index(name) {
            return Ok(finished_task(name, index));
        }
        if let Some(handle) = self.inner.scans.lock().get(name).cloned() {
            debug!(connection = name, scan = handle.id, "joining running scan");
            return Ok(IndexTask {
                connection: name.to_string(),
                handle,
            });
        }

        let engine = self.engine(name).await?;

        // Another caller may have started a scan while the engine was opening.
        let mut scans = self.inner.scans.lock();
        if let Some(handle) = scans.get(name).cloned() {
            return Ok(IndexTask {
                connection: name.to_string(),
                handle,
            });
        }

        let id = self.inner.next_scan_id.fetch_add(1, Ordering::Relaxed);
        let (reporter, progress) = ProgressReporter::new(self.inner.options.index.progress_stride);
        let (outcome_tx, outcome) = watch::channel(None);
        let cancel = self.inner.shutdown.child_token();
        let handle = ScanHandle {
            id,
            progress,
            outcome,
            cancel: cancel.clone(),
        };
        scans.insert(name.to_string(), handle.clone());
        drop(scans);

        info!(connection = name, scan = id, refresh = refresh, "key scan started");
        let session = self.clone();
        let connection = name.to_string();
        let options = self.inner.options.index;
        tokio::spawn(async move {
            let worker_name = connection.clone();
            let joined = tokio::task::spawn_blocking(move || {
                index::build_index(engine.as_ref(), &worker_name, &options, &reporter, &cancel)
            })
            .await;

            let outcome: ScanOutcome = match joined {
                Ok(Ok(index)) => Ok(Arc::new(index)),
                Ok(Err(Error::Cancelled(msg))) => Err(ScanAbort::Cancelled(msg)),
                Ok(Err(e)) => Err(ScanAbort::Worker(e.to_string())),
                Err(e) => Err(ScanAbort::Worker(format!("scan worker failed: {}", e))),
            };
            session.finish_scan(&connection, id, &outcome);
            outcome_tx.send_replace(Some(outcome));
        });

        Ok(IndexTask {
            connection: name.to_string(),
            handle,
        })
    }

    /// Retire a scan and cache its index, unless the scan was superseded.
    fn finish_scan(&self, name: &str, id: u64, outcome: &ScanOutcome) {
        let mut scans = self.inner.scans.lock();
        let current = scans.get(name).is_some_and(|h| h.id == id);
        if !current {
            debug!(connection = name, scan = id, "discarding result of superseded scan");
            return;
        }
        scans.remove(name);
        match outcome {
            Ok(index) => {
                self.inner
                    .indexes
                    .write()
                    .insert(name.to_string(), index.clone());
            }
            Err(ScanAbort::Cancelled(_)) => {
                info!(connection = name, scan = id, "key scan cancelled");
            }
            Err(ScanAbort::Worker(_reason)) => {
                warn!(connection = name, scan = id, error = %_reason, "key scan failed");
            }
        }
    }

    /// The session's index for a connection, building it if needed.
    pub async fn build_index(&self, name: &str) -> Result<Arc<KeyIndex>> {
        self.start_index(name, false).await?.wait().await
    }

    /// Rescan a connection, replacing its cached index.
    pub async fn refresh_index(&self, name: &str) -> Result<Arc<KeyIndex>> {
        self.start_index(name, true).await?.wait().await
    }

    pub fn cached_index(&self, name: &str) -> Option<Arc<KeyIndex>> {
        self.inner.indexes.read().get(name).cloned()
    }

    /// Cancel the running scan of a connection. Returns whether one was running.
    pub fn cancel_index(&self, name: &str) -> bool {
        match self.inner.scans.lock().get(name) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn index_status(&self, name: &str) -> Result<IndexStatus> {
        self.inner.registry.get(name)?;
        let scan = self
            .inner
            .scans
            .lock()
            .get(name)
            .map(|h| *h.progress.borrow());
        Ok(IndexStatus {
            connection: name.to_string(),
            scan,
            index: self.cached_index(name),
        })
    }

    /// Case-insensitive substring search over a connection's keys.
    pub async fn search_keys(&self, name: &str, term: &str) -> Result<Vec<String>> {
        let index = self.build_index(name).await?;
        Ok(index::filter_keys(&index, term))
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Full value as lossily decoded text.
    pub async fn get_value(&self, name: &str, key: &str) -> Result<String> {
        self.get_value_with(name, key, &CancellationToken::new())
            .await
    }

    /// [`Session::get_value`] that gives up once `cancel` fires.
    pub async fn get_value_with(
        &self,
        name: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let key = checked_key(key)?;
        let engine = self.engine(name).await?;
        let connection = name.to_string();
        self.run_blocking(cancel, format!("read of '{}' in '{}'", key, name), move || {
            value::raw_string(engine.as_ref(), &connection, &key)
        })
        .await
    }

    /// Describe a value, serving repeated requests from the cache.
    pub async fn inspect_value(&self, name: &str, key: &str) -> Result<Arc<ValueDescriptor>> {
        self.inspect_value_with(name, key, &CancellationToken::new())
            .await
    }

    /// [`Session::inspect_value`] that gives up once `cancel` fires.
    pub async fn inspect_value_with(
        &self,
        name: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<ValueDescriptor>> {
        let key = checked_key(key)?;
        if let Some(hit) = self.inner.values.get(name, &key) {
            return Ok(hit);
        }

        // Taken before the engine so a relocation in between is detected.
        let generation = self.inner.values.generation(name);
        let engine = self.engine(name).await?;
        let session = self.clone();
        let connection = name.to_string();
        let limits = self.inner.options.inspect;
        let fetch_key = key.clone();
        self.run_blocking(cancel, format!("inspect of '{}' in '{}'", key, name), move || {
            session
                .inner
                .values
                .get_or_fetch_at(&connection, &fetch_key, generation, || {
                    value::inspect(engine.as_ref(), &connection, &fetch_key, &limits)
                })
        })
        .await
    }

    /// Forget the cached descriptor of one key.
    pub fn invalidate_value(&self, name: &str, key: &str) -> bool {
        self.inner.values.invalidate(name, key)
    }

    /// Write the full value under `key` to `path`.
    pub async fn export_value(&self, name: &str, key: &str, path: &Path) -> Result<ExportReport> {
        self.export_value_with(name, key, path, &CancellationToken::new())
            .await
    }

    /// [`Session::export_value`] that stops waiting once `cancel` fires.
    ///
    /// The blocking write is not interrupted; a partially written file may
    /// be left behind.
    pub async fn export_value_with(
        &self,
        name: &str,
        key: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExportReport> {
        let key = checked_key(key)?;
        let engine = self.engine(name).await?;
        let connection = name.to_string();
        let target = path.to_path_buf();
        self.run_blocking(cancel, format!("export of '{}' in '{}'", key, name), move || {
            export::export_to_file(engine.as_ref(), &connection, &key, &target)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Cancel all work and close every engine handle.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.scans.lock().clear();
        self.inner.engines.lock().await.clear();
        info!("session shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

fn checked_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(Error::invalid_input("key must not be empty"));
    }
    Ok(key.to_string())
}

fn finished_task(name: &str, index: Arc<KeyIndex>) -> IndexTask {
    let done = ScanProgress {
        scanned: index.total_keys,
        estimate: index.estimate.total_keys_estimate,
        percent: 100,
        done: true,
    };
    let (_progress_tx, progress) = watch::channel(done);
    let (_outcome_tx, outcome) = watch::channel(Some(Ok(index)));
    IndexTask {
        connection: name.to_string(),
        handle: ScanHandle {
            id: 0,
            progress,
            outcome,
            cancel: CancellationToken::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;

    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::{MemoryEngine, MemoryOpener};

    /// Wraps a memory engine and parks the worker thread at a chosen point
    /// until the test releases it.
    struct GatedEngine {
        inner: MemoryEngine,
        park_reads: bool,
        park_scan_after: Option<u64>,
        parked: mpsc::UnboundedSender<()>,
        release: Mutex<mpsc::UnboundedReceiver<()>>,
    }

    struct Gate {
        parked: mpsc::UnboundedReceiver<()>,
        release: mpsc::UnboundedSender<()>,
    }

    impl GatedEngine {
        fn new(inner: MemoryEngine) -> (Self, Gate) {
            let (parked_tx, parked) = mpsc::unbounded_channel();
            let (release, release_rx) = mpsc::unbounded_channel();
            let engine = Self {
                inner,
                park_reads: false,
                park_scan_after: None,
                parked: parked_tx,
                release: Mutex::new(release_rx),
            };
            (engine, Gate { parked, release })
        }

        fn park_reads(mut self) -> Self {
            self.park_reads = true;
            self
        }

        fn park_scan_after(mut self, keys: u64) -> Self {
            self.park_scan_after = Some(keys);
            self
        }

        fn park(&self) {
            let _ = self.parked.send(());
            let _ = self.release.lock().blocking_recv();
        }
    }

    impl StoreEngine for GatedEngine {
        fn estimate(&self) -> Result<IndexEstimate> {
            self.inner.estimate()
        }

        fn visit_keys(&self, visitor: &mut dyn FnMut(&[u8]) -> ControlFlow<()>) -> Result<()> {
            let mut visited = 0u64;
            self.inner.visit_keys(&mut |key| {
                if self.park_scan_after == Some(visited) {
                    self.park();
                }
                visited += 1;
                visitor(key)
            })
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            if self.park_reads {
                self.park();
            }
            self.inner.get(key)
        }
    }

    /// Opener over a fixed set of engines of any kind.
    #[derive(Default)]
    struct FixedOpener {
        engines: HashMap<PathBuf, Arc<dyn StoreEngine>>,
    }

    impl FixedOpener {
        fn with(mut self, location: &str, engine: Arc<dyn StoreEngine>) -> Self {
            self.engines.insert(PathBuf::from(location), engine);
            self
        }
    }

    impl EngineOpener for FixedOpener {
        fn open(&self, location: &Path) -> Result<Arc<dyn StoreEngine>> {
            self.engines
                .get(location)
                .cloned()
                .ok_or_else(|| Error::invalid_input(format!("nothing at '{}'", location.display())))
        }
    }

    fn session_on(opener: FixedOpener) -> Session {
        let session = Session::new(
            ConnectionRegistry::in_memory(),
            Arc::new(opener),
            SessionOptions::default(),
        );
        session.add_connection("main", "/mem/main").unwrap();
        session
    }

    fn session_with(engine: Arc<MemoryEngine>) -> Session {
        let opener = MemoryOpener::new();
        opener.mount("/mem/main", engine);
        let session = Session::new(
            ConnectionRegistry::in_memory(),
            Arc::new(opener),
            SessionOptions::default(),
        );
        session.add_connection("main", "/mem/main").unwrap();
        session
    }

    #[tokio::test]
    async fn test_build_index_is_cached() {
        let engine = Arc::new(MemoryEngine::with_entries([("acct/1", "a"), ("block/9", "b")]));
        let session = session_with(engine.clone());

        let first = session.build_index("main").await.unwrap();
        let second = session.build_index("main").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.keys_visited(), 2);

        let refreshed = session.refresh_index("main").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(engine.keys_visited(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_builds_share_one_scan() {
        let entries: Vec<(String, String)> =
            (0..1_000).map(|i| (format!("k/{:04}", i), "v".to_string())).collect();
        let engine = Arc::new(MemoryEngine::with_entries(entries));
        let session = session_with(engine.clone());

        let first = session.start_index("main", false).await.unwrap();
        let second = session.start_index("main", false).await.unwrap();
        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(engine.keys_visited(), 1_000);
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let session = session_with(Arc::new(MemoryEngine::new()));
        let err = session.build_index("nope").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionNotFound(_)));
        let err = session.inspect_value("nope", "k").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_inspect_twice_reads_once() {
        let engine = Arc::new(MemoryEngine::with_entries([("k", r#"{"a":1}"#)]));
        let session = session_with(engine.clone());

        let first = session.inspect_value("main", "k").await.unwrap();
        let second = session.inspect_value("main", "k").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.read_count(), 1);

        assert!(session.invalidate_value("main", "k"));
        session.inspect_value("main", "k").await.unwrap();
        assert_eq!(engine.read_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let session = session_with(Arc::new(MemoryEngine::new()));
        assert!(matches!(
            session.get_value("main", "").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_update_drops_derived_state() {
        let engine = Arc::new(MemoryEngine::with_entries([("k", "v")]));
        let session = session_with(engine);
        session.build_index("main").await.unwrap();
        session.inspect_value("main", "k").await.unwrap();

        session
            .update_connection("main", "renamed", "/mem/main")
            .await
            .unwrap();
        assert!(session.cached_index("main").is_none());
        assert!(session.value_cache().is_empty());
        assert_eq!(session.list_connections(), vec!["renamed"]);
        assert_eq!(session.get_value("renamed", "k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_cancel_stops_scan_midway() {
        let entries: Vec<(String, String)> =
            (0..10_000).map(|i| (format!("k/{:05}", i), "v".to_string())).collect();
        let (engine, mut gate) = GatedEngine::new(MemoryEngine::with_entries(entries));
        let engine = Arc::new(engine.park_scan_after(100));
        let session = session_on(FixedOpener::default().with("/mem/main", engine.clone()));

        let task = session.start_index("main", false).await.unwrap();
        gate.parked.recv().await.unwrap();
        task.cancel();
        gate.release.send(()).unwrap();

        assert!(matches!(task.wait().await, Err(Error::Cancelled(_))));
        // The key in hand when the cancel landed is the last one visited.
        assert_eq!(engine.inner.keys_visited(), 101);
        assert!(session.cached_index("main").is_none());
        assert!(session.index_status("main").unwrap().scan.is_none());
    }

    #[tokio::test]
    async fn test_progress_only_moves_forward() {
        let entries: Vec<(String, String)> =
            (0..20_000).map(|i| (format!("k/{:05}", i), "v".to_string())).collect();
        let (engine, mut gate) = GatedEngine::new(MemoryEngine::with_entries(entries));
        let engine = Arc::new(engine.park_scan_after(5_000));
        let options = SessionOptions {
            index: IndexOptions {
                progress_stride: 50,
                ..IndexOptions::default()
            },
            ..SessionOptions::default()
        };
        let session = Session::new(
            ConnectionRegistry::in_memory(),
            Arc::new(FixedOpener::default().with("/mem/main", engine)),
            options,
        );
        session.add_connection("main", "/mem/main").unwrap();

        let task = session.start_index("main", false).await.unwrap();
        let mut progress = task.progress();
        gate.parked.recv().await.unwrap();
        let midway = task.current();
        assert_eq!(midway.scanned, 5_000);
        assert_eq!(midway.percent, 25);
        assert!(!midway.done);
        gate.release.send(()).unwrap();

        let mut seen = vec![*progress.borrow_and_update()];
        while !seen.last().is_some_and(|p| p.done) {
            if progress.changed().await.is_err() {
                break;
            }
            seen.push(*progress.borrow_and_update());
        }
        seen.push(*progress.borrow());

        for pair in seen.windows(2) {
            assert!(pair[0].percent <= pair[1].percent, "{:?}", pair);
            assert!(pair[0].scanned <= pair[1].scanned, "{:?}", pair);
        }
        for sample in &seen {
            assert_eq!(sample.percent == 100, sample.done, "{:?}", sample);
        }
        let last = seen.last().copied().unwrap_or_default();
        assert!(last.done);
        assert_eq!(last.scanned, 20_000);
        assert_eq!(task.wait().await.unwrap().total_keys, 20_000);
    }

    #[tokio::test]
    async fn test_relocation_during_inspect_is_not_cached() {
        let (old, mut gate) = GatedEngine::new(MemoryEngine::with_entries([("k", "old")]));
        let opener = FixedOpener::default()
            .with("/old", Arc::new(old.park_reads()))
            .with("/new", Arc::new(MemoryEngine::with_entries([("k", "new")])));
        let session = Session::new(
            ConnectionRegistry::in_memory(),
            Arc::new(opener),
            SessionOptions::default(),
        );
        session.add_connection("main", "/old").unwrap();

        let inflight = tokio::spawn({
            let session = session.clone();
            async move { session.inspect_value("main", "k").await }
        });
        gate.parked.recv().await.unwrap();
        session
            .update_connection("main", "main", "/new")
            .await
            .unwrap();
        gate.release.send(()).unwrap();

        // The caller that asked before the move still gets its answer...
        let stale = inflight.await.unwrap().unwrap();
        assert_eq!(stale.rendering.string_form, "old");
        // ...but it is not served to anyone after it.
        assert!(session.value_cache().is_empty());
        let fresh = session.inspect_value("main", "k").await.unwrap();
        assert_eq!(fresh.rendering.string_form, "new");
    }

    #[tokio::test]
    async fn test_remove_during_inspect_is_not_cached() {
        let (engine, mut gate) = GatedEngine::new(MemoryEngine::with_entries([("k", "v")]));
        let session = session_on(FixedOpener::default().with("/mem/main", Arc::new(engine.park_reads())));

        let inflight = tokio::spawn({
            let session = session.clone();
            async move { session.inspect_value("main", "k").await }
        });
        gate.parked.recv().await.unwrap();
        session.remove_connection(" main ").await.unwrap();
        gate.release.send(()).unwrap();

        inflight.await.unwrap().unwrap();
        assert!(session.value_cache().is_empty());
        assert!(matches!(
            session.inspect_value("main", "k").await,
            Err(Error::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_value_reads_stop_waiting_on_cancel() {
        let (engine, mut gate) = GatedEngine::new(MemoryEngine::with_entries([("k", "v")]));
        let session = session_on(FixedOpener::default().with("/mem/main", Arc::new(engine.park_reads())));

        let cancel = CancellationToken::new();
        let read = tokio::spawn({
            let session = session.clone();
            let cancel = cancel.clone();
            async move { session.get_value_with("main", "k", &cancel).await }
        });
        gate.parked.recv().await.unwrap();
        cancel.cancel();
        assert!(matches!(read.await.unwrap(), Err(Error::Cancelled(_))));
        gate.release.send(()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let export = tokio::spawn({
            let session = session.clone();
            let cancel = cancel.clone();
            let target = dir.path().join("k.bin");
            async move { session.export_value_with("main", "k", &target, &cancel).await }
        });
        gate.parked.recv().await.unwrap();
        cancel.cancel();
        assert!(matches!(export.await.unwrap(), Err(Error::Cancelled(_))));
        gate.release.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_work() {
        let session = session_with(Arc::new(MemoryEngine::with_entries([("k", "v")])));
        session.shutdown().await;
        assert!(session.is_shut_down());
        assert!(session.get_value("main", "k").await.is_err());
    }
}
