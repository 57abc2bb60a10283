//! Unified error type for the kvscope library.
//!
//! Every public operation returns either a definite value or one of the
//! variants below. Validation failures are reported before anything is
//! mutated; engine failures are surfaced with the engine's own detail and are
//! never retried here.

use thiserror::Error;

/// Boxed error coming out of a storage engine adapter.
pub type EngineSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for all kvscope operations.
///
/// # Example
///
/// ```ignore
/// use kvscope::{Error, Result, Session};
///
/// async fn show(session: &Session) -> Result<()> {
///     match session.inspect_value("main", "acct/1").await {
///         Ok(value) => println!("{}", value.render(Default::default())),
///         Err(e) if e.is_not_found() => println!("gone"),
///         Err(e) => return Err(e),
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Empty or malformed caller input (name, location, key, config value).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A connection with this name is already registered.
    #[error("Connection already exists: {0}")]
    DuplicateName(String),

    /// No connection registered under this name.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// The key does not exist in the connection's store.
    #[error("Key not found: {key} (connection '{connection}')")]
    KeyNotFound { connection: String, key: String },

    /// The database exists but has no keyspace of this name.
    #[error("Keyspace '{keyspace}' not found in '{location}'")]
    KeyspaceNotFound { location: String, keyspace: String },

    /// An index was requested complete but the scan stopped early.
    #[error("Key scan for '{connection}' incomplete after {keys_scanned} keys: {reason}")]
    ScanPartialFailure {
        connection: String,
        keys_scanned: u64,
        reason: String,
    },

    /// I/O error outside of an export.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Export sink failed; `written` bytes of `total` reached it.
    #[error("Export of '{key}' failed after {written} of {total} bytes: {source}")]
    Export {
        key: String,
        written: u64,
        total: u64,
        #[source]
        source: std::io::Error,
    },

    /// Opaque failure from the storage engine.
    #[error("Storage engine error: {0}")]
    Engine(#[source] EngineSource),

    /// The connection registry could not be loaded or persisted.
    #[error("Connection registry error: {0}")]
    Registry(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation was abandoned through its cancellation token.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A background worker died before producing a result.
    #[error("Background worker failed: {0}")]
    Worker(String),
}

/// A [`Result`] type alias using the unified [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid input error from a message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wrap an error produced by a storage engine.
    pub fn engine<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Engine(Box::new(err))
    }

    /// Create an engine error from a plain message.
    pub fn engine_msg(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self::Engine(msg.into())
    }

    /// Create a key not found error.
    pub fn key_not_found(connection: &str, key: &str) -> Self {
        Self::KeyNotFound {
            connection: connection.to_string(),
            key: key.to_string(),
        }
    }

    /// Returns `true` for missing connections, keyspaces and keys.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConnectionNotFound(_) | Self::KeyNotFound { .. } | Self::KeyspaceNotFound { .. }
        )
    }

    /// Returns `true` if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns `true` if this is a storage engine error.
    pub fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// Returns `true` for I/O and export sink errors.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Export { .. })
    }
}

#[cfg(feature = "kv")]
impl From<fjall::Error> for Error {
    fn from(err: fjall::Error) -> Self {
        Self::engine(err)
    }
}
