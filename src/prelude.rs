//! Convenient re-exports for common usage patterns.
//!
//! This module provides a single import to bring all commonly used types
//! into scope.
//!
//! # Example
//!
//! ```ignore
//! use kvscope::prelude::*;
//!
//! let session = Session::from_config(&Config::default())?;
//! let hits = session.search_keys("main", "acct").await?;
//! ```

// Unified error handling
pub use crate::error::{Error, Result};

// Session and configuration
pub use crate::config::Config;
pub use crate::session::{IndexTask, Session, SessionOptions};

// Connections
pub use crate::registry::{Connection, ConnectionRegistry, JsonFileStore};

// Index and values
pub use crate::export::ExportReport;
pub use crate::index::{KeyIndex, ScanProgress};
pub use crate::value::{RenderFormat, ValueDescriptor, ValueType};

// Engines
pub use crate::engine::{EngineOpener, StoreEngine};
#[cfg(feature = "kv")]
pub use crate::engine::FjallOpener;
