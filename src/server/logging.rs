//! Logging initialization and configuration.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::sync::Arc;

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the tracing subscriber based on configuration.
///
/// `RUST_LOG`, when set, takes precedence over `logging.level`.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(directive),
        _ => EnvFilter::try_new(&config.level),
    }
    .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;

    let (writer, ansi) = make_writer(config)?;

    let result = match (config.format, config.timestamps) {
        (LogFormat::Text, true) => tracing_subscriber::registry()
            .with(filter)
            .with(base_layer(config, writer).with_ansi(ansi))
            .try_init(),
        (LogFormat::Text, false) => tracing_subscriber::registry()
            .with(filter)
            .with(base_layer(config, writer).with_ansi(ansi).without_time())
            .try_init(),
        (LogFormat::Json, true) => tracing_subscriber::registry()
            .with(filter)
            .with(base_layer(config, writer).json())
            .try_init(),
        (LogFormat::Json, false) => tracing_subscriber::registry()
            .with(filter)
            .with(base_layer(config, writer).json().without_time())
            .try_init(),
    };
    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

fn base_layer<S>(
    config: &LoggingConfig,
    writer: BoxMakeWriter,
) -> fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format, BoxMakeWriter> {
    fmt::layer()
        .with_target(config.target)
        .with_span_events(FmtSpan::NONE)
        .with_writer(writer)
}

/// Pick the output stream and whether it may carry ANSI colors.
fn make_writer(config: &LoggingConfig) -> Result<(BoxMakeWriter, bool), LoggingError> {
    match config.output.as_str() {
        "stdout" => Ok((
            BoxMakeWriter::new(io::stdout),
            config.color && io::stdout().is_terminal(),
        )),
        "stderr" => Ok((
            BoxMakeWriter::new(io::stderr),
            config.color && io::stderr().is_terminal(),
        )),
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| LoggingError::FileOpen(path.to_string(), e))?;
            Ok((BoxMakeWriter::new(Arc::new(file)), false))
        }
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug)]
pub enum LoggingError {
    /// Invalid log filter string.
    InvalidFilter(String),
    /// Failed to open log file.
    FileOpen(String, io::Error),
    /// A global subscriber was already installed.
    AlreadyInitialized(String),
}

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggingError::InvalidFilter(msg) => write!(f, "Invalid log filter: {}", msg),
            LoggingError::FileOpen(path, e) => {
                write!(f, "Failed to open log file '{}': {}", path, e)
            }
            LoggingError::AlreadyInitialized(msg) => {
                write!(f, "Logging already initialized: {}", msg)
            }
        }
    }
}

impl std::error::Error for LoggingError {}
