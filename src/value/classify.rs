//! Value type classification.

use serde::{Deserialize, Serialize};

/// Share of printable characters above which text counts as printable.
const PRINTABLE_RATIO: f64 = 0.95;

/// Type tag reported for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Json,
    Binary,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Json => "json",
            ValueType::Binary => "binary",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a byte window, carrying the decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Strictly valid JSON text (object, array or scalar).
    Json(serde_json::Value),
    /// Printable UTF-8 text that is not JSON.
    Text(String),
    /// Anything else.
    Binary,
}

impl Classified {
    pub fn value_type(&self) -> ValueType {
        match self {
            Classified::Json(_) => ValueType::Json,
            Classified::Text(_) => ValueType::String,
            Classified::Binary => ValueType::Binary,
        }
    }
}

/// Classify bytes as JSON, printable text or binary.
///
/// Total: every input maps to exactly one variant.
pub fn classify(bytes: &[u8]) -> Classified {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Classified::Binary;
    };

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => Classified::Json(value),
        Err(_) if is_printable(text) => Classified::Text(text.to_string()),
        Err(_) => Classified::Binary,
    }
}

/// Whether text is mostly printable ASCII (plus tab and line breaks).
///
/// Empty text is not printable.
pub fn is_printable(text: &str) -> bool {
    let mut total = 0usize;
    let mut printable = 0usize;
    for c in text.chars() {
        total += 1;
        if matches!(c, ' '..='~' | '\n' | '\t' | '\r') {
            printable += 1;
        }
    }
    total > 0 && (printable as f64) / (total as f64) > PRINTABLE_RATIO
}
