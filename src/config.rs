//! Configuration loaded from TOML, with environment overrides.
//!
//! Every section is optional; a missing file section falls back to its
//! defaults. Scan limits can also be set through `KVSCOPE_MAX_KEYS_TOTAL`
//! and `KVSCOPE_MAX_KEYS_PER_PREFIX`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::index::{DEFAULT_PROGRESS_STRIDE, DEFAULT_SEPARATOR, IndexOptions, PrefixRule, ScanLimits};
use crate::logging::warn;
use crate::value::InspectLimits;

/// Environment variable overriding `index.max_total_keys`.
pub const ENV_MAX_KEYS_TOTAL: &str = "KVSCOPE_MAX_KEYS_TOTAL";
/// Environment variable overriding `index.max_keys_per_prefix`.
pub const ENV_MAX_KEYS_PER_PREFIX: &str = "KVSCOPE_MAX_KEYS_PER_PREFIX";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub index: IndexConfig,
    pub inspect: InspectLimits,
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

/// Which part of each connected database is browsed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// fjall keyspace opened for every connection.
    pub keyspace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keyspace: "default".to_string(),
        }
    }
}

/// Where the connection registry is persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kvscope-connections.json"),
        }
    }
}

/// Key scan settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Single character splitting a key's group prefix from the rest.
    pub separator: String,
    /// Publish progress every this many keys.
    pub progress_stride: u64,
    pub max_total_keys: Option<u64>,
    pub max_keys_per_prefix: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            progress_stride: DEFAULT_PROGRESS_STRIDE,
            max_total_keys: None,
            max_keys_per_prefix: None,
        }
    }
}

impl IndexConfig {
    fn separator_char(&self) -> Result<char> {
        let mut chars = self.separator.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(Error::Config(format!(
                "index.separator must be exactly one character, got '{}'",
                self.separator
            ))),
        }
    }
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1" or "0.0.0.0").
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7411,
        }
    }
}

/// Cross-origin settings for the HTTP server. Disabled by default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    /// Allowed origins; `"*"` allows any.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    /// Preflight cache duration in seconds.
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: Vec::new(),
            allow_methods: ["GET", "POST", "PUT", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allow_headers: vec!["content-type".to_string()],
            max_age: 3600,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Subscriber settings used by the binaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `kvscope=debug,tower_http=info`.
    pub level: String,
    pub format: LogFormat,
    /// `stdout`, `stderr`, or a file path to append to.
    pub output: String,
    pub color: bool,
    pub target: bool,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output: "stderr".to_string(),
            color: true,
            target: false,
            timestamps: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Apply `KVSCOPE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides read through `lookup`.
    ///
    /// Values that are not positive integers are ignored with a warning and
    /// the configured value is kept.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(max) = positive_override(&lookup, ENV_MAX_KEYS_TOTAL) {
            self.index.max_total_keys = Some(max);
        }
        if let Some(max) = positive_override(&lookup, ENV_MAX_KEYS_PER_PREFIX) {
            match usize::try_from(max) {
                Ok(max) => self.index.max_keys_per_prefix = Some(max),
                Err(_) => {
                    warn!(variable = ENV_MAX_KEYS_PER_PREFIX, "value out of range, ignoring");
                }
            }
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.store.keyspace.trim().is_empty() {
            return Err(Error::Config("store.keyspace must not be empty".into()));
        }
        self.index.separator_char()?;
        if self.index.progress_stride == 0 {
            return Err(Error::Config("index.progress_stride must be positive".into()));
        }
        if self.index.max_total_keys == Some(0) || self.index.max_keys_per_prefix == Some(0) {
            return Err(Error::Config("index scan limits must be positive".into()));
        }
        self.inspect.validate()
    }

    /// Scan options derived from the `[index]` section.
    pub fn index_options(&self) -> Result<IndexOptions> {
        Ok(IndexOptions {
            rule: PrefixRule::new(self.index.separator_char()?),
            limits: ScanLimits {
                max_total_keys: self.index.max_total_keys,
                max_keys_per_prefix: self.index.max_keys_per_prefix,
            },
            progress_stride: self.index.progress_stride.max(1),
        })
    }

    /// Get the socket address string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

fn positive_override(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(variable = name, value = %raw, "invalid override, keeping configured value");
            None
        }
    }
}
