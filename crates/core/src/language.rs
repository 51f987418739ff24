//! Language tags
//!
//! Clients send BCP-47-ish tags (`en-US`, `es-ES`, plain `fr`). The broker
//! never interprets them beyond normalization and equality; providers get
//! the full tag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized language tag.
///
/// Normalization: primary subtag lowercased, region subtag uppercased,
/// surrounding whitespace stripped. An empty tag is representable (students
/// may register before choosing a language) and is skipped at delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageTag(String);

impl LanguageTag {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize(raw.as_ref()))
    }

    /// The empty tag, meaning "not chosen yet"
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary subtag (`en` for `en-US`)
    pub fn primary(&self) -> &str {
        self.0.split('-').next().unwrap_or("")
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LanguageTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LanguageTag {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let mut parts = trimmed.split('-');
    let mut out = String::with_capacity(trimmed.len());
    if let Some(primary) = parts.next() {
        out.push_str(&primary.to_ascii_lowercase());
    }
    for part in parts {
        out.push('-');
        // Two-letter subtags are regions; leave longer subtags as-is
        if part.len() == 2 {
            out.push_str(&part.to_ascii_uppercase());
        } else {
            out.push_str(part);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case() {
        assert_eq!(LanguageTag::new("EN-us").as_str(), "en-US");
        assert_eq!(LanguageTag::new("fr").as_str(), "fr");
        assert_eq!(LanguageTag::new("  es-ES ").as_str(), "es-ES");
    }

    #[test]
    fn test_primary_subtag() {
        assert_eq!(LanguageTag::new("en-US").primary(), "en");
        assert_eq!(LanguageTag::empty().primary(), "");
    }

    #[test]
    fn test_empty() {
        assert!(LanguageTag::new("   ").is_empty());
        assert!(!LanguageTag::new("de").is_empty());
    }
}
