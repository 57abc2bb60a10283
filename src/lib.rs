//! Key-space indexing and value introspection for embedded ordered
//! key-value stores.
//!
//! This library turns a flat, lexicographically ordered namespace of binary
//! keys into a navigable prefix hierarchy, and turns arbitrary byte values
//! into safe, size-bounded renderings (text, pretty JSON, hex and base64).
//!
//! # Quick Start
//!
//! ```ignore
//! use kvscope::prelude::*;
//!
//! let session = Session::from_config(&Config::default())?;
//! session.add_connection("main", "/var/lib/app/db")?;
//!
//! // Group every key by the text before its first '/'
//! let index = session.build_index("main").await?;
//! println!("{} keys in {} groups", index.total_keys, index.groups.len());
//!
//! // Inspect one value, bounded and classified
//! let value = session.inspect_value("main", "acct/1").await?;
//! println!("{}", value.render(RenderFormat::Auto));
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Named connections and their persistence
//! - [`index`] - Prefix grouping, progress and key search
//! - [`value`] - Value classification and rendering
//! - [`cache`] - Memoized value descriptors
//! - [`export`] - Streaming full values to a sink
//! - [`session`] - Async session tying it all together
//! - [`engine`] - Storage engine adapters (fjall with the `kv` feature)
//!
//! # Feature Flags
//!
//! - `kv` - Enable the fjall storage adapter (enabled by default)
//! - `logging` - Enable library-level tracing (consumers provide their own subscriber)
//! - `cli` - Enable the command-line interface binary
//! - `server` - Enable the HTTP API server
//! - `full` - Enable all features

pub mod cache;
pub mod config;
pub mod engine;
mod error;
pub mod export;
pub mod index;
pub mod key;
mod logging;
pub mod prelude;
pub mod registry;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod value;

// Re-export the unified error type
pub use error::{EngineSource, Error, Result};

pub use cache::ValueCache;
pub use config::Config;
pub use engine::{EngineOpener, IndexEstimate, MemoryEngine, MemoryOpener, StoreEngine};
#[cfg(feature = "kv")]
pub use engine::{FjallEngine, FjallOpener};
pub use export::{ExportReport, suggested_file_name};
pub use index::{
    IndexOptions, IndexTruncation, KeyIndex, PrefixRule, PrefixSummary, ScanLimits, ScanProgress,
    build_index, filter_keys,
};
pub use key::{display_key, parse_display_key};
pub use registry::{Connection, ConnectionRegistry, JsonFileStore, MemoryStore, RegistryStore};
pub use session::{IndexStatus, IndexTask, Session, SessionOptions};
pub use value::{InspectLimits, RenderFormat, ValueDescriptor, ValueType, classify, format_bytes};
