//! Value inspection: fetch, bound, classify and render a single value.
//!
//! A [`ValueDescriptor`] is built from a *window* of the value's bytes. For
//! values up to [`InspectLimits::truncate_above`] the window is the whole
//! value; larger values are shown through a preview window of
//! [`InspectLimits::preview_bytes`] and flagged as truncated. The string, hex
//! and base64 renderings always cover exactly the same window.

mod classify;
mod size;

use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::engine::StoreEngine;
use crate::error::{Error, Result};
use crate::key::parse_display_key;
use crate::logging::{debug, trace};

pub use classify::{Classified, ValueType, classify, is_printable};
pub use size::format_bytes;

/// Values above this size are truncated for display (1 MiB).
pub const DEFAULT_TRUNCATE_ABOVE: u64 = 1024 * 1024;

/// Bytes shown for a truncated value (100 KiB).
pub const DEFAULT_PREVIEW_BYTES: u64 = 100 * 1024;

/// Longest incomplete UTF-8 sequence trimmed off a preview window.
const MAX_PARTIAL_CHAR: usize = 3;

/// Size bounds applied when inspecting a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectLimits {
    /// Values larger than this are truncated.
    pub truncate_above: u64,
    /// Window size used for truncated values; never above `truncate_above`.
    pub preview_bytes: u64,
}

impl Default for InspectLimits {
    fn default() -> Self {
        Self {
            truncate_above: DEFAULT_TRUNCATE_ABOVE,
            preview_bytes: DEFAULT_PREVIEW_BYTES,
        }
    }
}

impl InspectLimits {
    pub fn validate(&self) -> Result<()> {
        if self.preview_bytes == 0 {
            return Err(Error::Config("inspect.preview_bytes must be positive".into()));
        }
        if self.preview_bytes > self.truncate_above {
            return Err(Error::Config(format!(
                "inspect.preview_bytes ({}) must not exceed inspect.truncate_above ({})",
                self.preview_bytes, self.truncate_above
            )));
        }
        Ok(())
    }
}

/// The three renderings of a value window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendering {
    /// Pretty JSON, decoded text, or lossy text for binary values.
    pub string_form: String,
    /// Lowercase hex, two digits per byte, no separators.
    pub hex_form: String,
    /// Standard padded base64.
    pub base64_form: String,
}

/// Rendering requested by a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    /// String form for JSON and text, hex for binary.
    #[default]
    Auto,
    String,
    Hex,
    Base64,
}

impl RenderFormat {
    /// Resolve `Auto` against a value type; other formats pass through.
    pub fn resolve(self, value_type: ValueType) -> RenderFormat {
        match (self, value_type) {
            (RenderFormat::Auto, ValueType::Json | ValueType::String) => RenderFormat::String,
            (RenderFormat::Auto, ValueType::Binary) => RenderFormat::Hex,
            (format, _) => format,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderFormat::Auto => "auto",
            RenderFormat::String => "string",
            RenderFormat::Hex => "hex",
            RenderFormat::Base64 => "base64",
        }
    }
}

impl FromStr for RenderFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(RenderFormat::Auto),
            "string" | "text" => Ok(RenderFormat::String),
            "hex" => Ok(RenderFormat::Hex),
            "base64" => Ok(RenderFormat::Base64),
            other => Err(Error::invalid_input(format!(
                "unknown render format '{}' (expected auto, string, hex or base64)",
                other
            ))),
        }
    }
}

/// Classified, size-bounded, multi-format view of one value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueDescriptor {
    /// Display key.
    pub key: String,
    /// True size of the stored value.
    pub size_bytes: u64,
    /// Size of the window the renderings cover.
    pub window_bytes: u64,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub rendering: Rendering,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation_note: Option<String>,
}

impl ValueDescriptor {
    /// Build a descriptor from a value's full bytes.
    pub fn from_bytes(key: impl Into<String>, bytes: &[u8], limits: &InspectLimits) -> Self {
        let size_bytes = bytes.len() as u64;
        let (window, truncated) = display_window(bytes, limits);
        let window_bytes = window.len() as u64;

        let classified = classify(window);
        let value_type = classified.value_type();
        let string_form = match classified {
            Classified::Json(value) if !truncated => {
                serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| String::from_utf8_lossy(window).into_owned())
            }
            Classified::Json(_) | Classified::Binary => {
                String::from_utf8_lossy(window).into_owned()
            }
            Classified::Text(text) => text,
        };

        let truncation_note = truncated.then(|| {
            format!(
                "Value is {} ({} bytes); showing the first {} ({} bytes). Export the key to get the full value.",
                format_bytes(size_bytes),
                size_bytes,
                format_bytes(window_bytes),
                window_bytes
            )
        });

        Self {
            key: key.into(),
            size_bytes,
            window_bytes,
            value_type,
            rendering: Rendering {
                string_form,
                hex_form: hex::encode(window),
                base64_form: BASE64.encode(window),
            },
            truncated,
            truncation_note,
        }
    }

    /// The rendering selected by `format`.
    pub fn render(&self, format: RenderFormat) -> &str {
        match format.resolve(self.value_type) {
            RenderFormat::Hex => &self.rendering.hex_form,
            RenderFormat::Base64 => &self.rendering.base64_form,
            RenderFormat::String | RenderFormat::Auto => &self.rendering.string_form,
        }
    }
}

/// Pick the bytes to render and whether that is a truncated preview.
fn display_window<'a>(bytes: &'a [u8], limits: &InspectLimits) -> (&'a [u8], bool) {
    if bytes.len() as u64 <= limits.truncate_above {
        return (bytes, false);
    }
    let cut = usize::try_from(limits.preview_bytes.min(limits.truncate_above))
        .unwrap_or(usize::MAX)
        .min(bytes.len());
    let window = bytes.get(..cut).unwrap_or(bytes);
    (trim_partial_char(window), true)
}

/// Drop a multi-byte character cut in half by the preview boundary.
fn trim_partial_char(window: &[u8]) -> &[u8] {
    match std::str::from_utf8(window) {
        Err(e) if e.error_len().is_none() && window.len() - e.valid_up_to() <= MAX_PARTIAL_CHAR => {
            window.get(..e.valid_up_to()).unwrap_or(window)
        }
        _ => window,
    }
}

/// Fetch and describe the value stored under a display key.
pub fn inspect(
    engine: &dyn StoreEngine,
    connection: &str,
    key: &str,
    limits: &InspectLimits,
) -> Result<ValueDescriptor> {
    debug!(connection = connection, key = key, "inspecting value");
    let raw = parse_display_key(key);
    let bytes = engine
        .get(&raw)?
        .ok_or_else(|| Error::key_not_found(connection, key))?;

    let descriptor = ValueDescriptor::from_bytes(key, &bytes, limits);
    trace!(
        connection = connection,
        key = key,
        size = descriptor.size_bytes,
        value_type = %descriptor.value_type,
        truncated = descriptor.truncated,
        "value described"
    );
    Ok(descriptor)
}

/// Fetch the full value as lossily decoded text.
pub fn raw_string(engine: &dyn StoreEngine, connection: &str, key: &str) -> Result<String> {
    let raw = parse_display_key(key);
    let bytes = engine
        .get(&raw)?
        .ok_or_else(|| Error::key_not_found(connection, key))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
