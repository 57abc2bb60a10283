//! Display encoding for raw store keys.
//!
//! Keys are arbitrary bytes. A key that is printable UTF-8 is shown as-is;
//! anything else is shown as `0x` followed by lowercase hex. The encoding is
//! reversible so callers can hand display keys back for lookups.

use crate::value::is_printable;

/// Prefix marking a hex-encoded display key.
pub const HEX_KEY_PREFIX: &str = "0x";

/// Convert raw key bytes into their display form.
pub fn display_key(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) if is_printable(text) && !looks_hex_encoded(text) => text.to_string(),
        _ => format!("{}{}", HEX_KEY_PREFIX, hex::encode(raw)),
    }
}

/// Convert a display key back into raw key bytes.
///
/// A `0x`-prefixed key with a valid hex body decodes to those bytes; every
/// other string is taken literally.
pub fn parse_display_key(display: &str) -> Vec<u8> {
    if let Some(body) = display.strip_prefix(HEX_KEY_PREFIX)
        && let Ok(decoded) = hex::decode(body)
    {
        return decoded;
    }
    display.as_bytes().to_vec()
}

/// A printable key that would itself parse as a hex display key must be
/// hex-encoded too, otherwise it could not be told apart on the way back.
fn looks_hex_encoded(text: &str) -> bool {
    text.strip_prefix(HEX_KEY_PREFIX)
        .is_some_and(|body| hex::decode(body).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_key_is_shown_verbatim() {
        assert_eq!(display_key(b"acct/1"), "acct/1");
        assert_eq!(parse_display_key("acct/1"), b"acct/1".to_vec());
    }

    #[test]
    fn test_binary_key_is_hex_encoded() {
        let raw = [0x00, 0xff, 0x10];
        let shown = display_key(&raw);
        assert_eq!(shown, "0x00ff10");
        assert_eq!(parse_display_key(&shown), raw.to_vec());
    }

    #[test]
    fn test_printable_key_resembling_hex_survives() {
        let raw = b"0xbeef";
        let shown = display_key(raw);
        assert_eq!(shown, "0x307862656566");
        assert_eq!(parse_display_key(&shown), raw.to_vec());
    }

    #[test]
    fn test_invalid_hex_body_is_literal() {
        assert_eq!(parse_display_key("0xnothex"), b"0xnothex".to_vec());
        assert_eq!(display_key(b"0xnothex"), "0xnothex");
    }

    #[test]
    fn test_empty_key() {
        assert_eq!(display_key(b""), "0x");
        assert_eq!(parse_display_key("0x"), Vec::<u8>::new());
    }
}
