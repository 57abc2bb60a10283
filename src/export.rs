//! Streaming a value's full bytes to a sink.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::engine::StoreEngine;
use crate::error::{Error, Result};
use crate::key::parse_display_key;
use crate::logging::{debug, info, warn};

/// Bytes handed to the sink per write call.
pub const EXPORT_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a finished export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub key: String,
    pub bytes_written: u64,
}

/// Write the untruncated value under `key` into `sink`.
///
/// On a sink failure the error states how many bytes were written before
/// it; the store is never touched beyond one read.
pub fn export(
    engine: &dyn StoreEngine,
    connection: &str,
    key: &str,
    sink: &mut dyn Write,
) -> Result<ExportReport> {
    let raw = parse_display_key(key);
    let bytes = engine
        .get(&raw)?
        .ok_or_else(|| Error::key_not_found(connection, key))?;
    let total = bytes.len() as u64;
    debug!(connection = connection, key = key, total = total, "exporting value");

    let mut written: u64 = 0;
    let fail = |written: u64, source: std::io::Error| {
        warn!(key = key, written = written, total = total, error = %source, "export failed");
        Error::Export {
            key: key.to_string(),
            written,
            total,
            source,
        }
    };

    for chunk in bytes.chunks(EXPORT_CHUNK_SIZE) {
        sink.write_all(chunk).map_err(|e| fail(written, e))?;
        written += chunk.len() as u64;
    }
    sink.flush().map_err(|e| fail(written, e))?;

    info!(connection = connection, key = key, bytes = written, "value exported");
    Ok(ExportReport {
        key: key.to_string(),
        bytes_written: written,
    })
}

/// Export into a file, creating or truncating it.
pub fn export_to_file(
    engine: &dyn StoreEngine,
    connection: &str,
    key: &str,
    path: &Path,
) -> Result<ExportReport> {
    // Look the key up first so a missing key leaves no empty file behind.
    let raw = parse_display_key(key);
    if engine.value_len(&raw)?.is_none() {
        return Err(Error::key_not_found(connection, key));
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    export(engine, connection, key, &mut writer)
}

/// Default file name offered for an exported key: `export_<key>.bin`.
pub fn suggested_file_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("export_{}.bin", safe)
}
