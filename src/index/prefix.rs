//! The grouping rule for display keys.

/// Separator used when none is configured.
pub const DEFAULT_SEPARATOR: char = '/';

/// Groups keys by the text before the first separator.
///
/// Keys without the separator fall into the default group, whose prefix is
/// the empty string. This is the only place that decides a key's group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixRule {
    separator: char,
}

impl PrefixRule {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// The group prefix of a display key.
    pub fn group_of<'a>(&self, key: &'a str) -> &'a str {
        key.split_once(self.separator)
            .map(|(prefix, _)| prefix)
            .unwrap_or("")
    }
}

impl Default for PrefixRule {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}
