//! Shared value types used across the parser, catalog, and pipeline.
//!
//! These cross module boundaries (parser → catalog, catalog → listing) and
//! are serialized into CLI JSON output, so they live here rather than in any
//! one stage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An issue or volume designator recovered from a filename.
///
/// Purely numeric tokens are coerced to integers (`"023"` → `23`); anything
/// else (`"Annual"`, `"1.5"`) is kept as text so it can still be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Number(u32),
    Text(String),
}

impl Token {
    /// Coerce a raw token: all-digit strings become numbers, the rest stay text.
    pub fn coerce(raw: &str) -> Self {
        let raw = raw.trim();
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<u32>() {
                return Token::Number(n);
            }
        }
        Token::Text(raw.to_string())
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            Token::Number(n) => Some(*n),
            Token::Text(_) => None,
        }
    }

    /// Does this token start with a digit when rendered?
    ///
    /// Drives the `#N` display normalization: `23` and `"1.5"` get a hash,
    /// `"Annual"` does not.
    pub fn is_numeric_like(&self) -> bool {
        match self {
            Token::Number(_) => true,
            Token::Text(s) => s.starts_with(|c: char| c.is_ascii_digit()),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Text(s) => f.write_str(s),
        }
    }
}

/// Target geometry of one cached rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Geometry {
    /// The cover image bytes exactly as stored in the archive.
    Native,
    /// A thumbnail fitted to (or exactly resized to) `width`×`height`.
    Box { width: u32, height: u32 },
}

impl Geometry {
    /// Filename suffix used by the cache layout: `native` or `{W}x{H}`.
    pub fn suffix(&self) -> String {
        match self {
            Geometry::Native => "native".to_string(),
            Geometry::Box { width, height } => format!("{}x{}", width, height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_zero_padded_digits() {
        assert_eq!(Token::coerce("023"), Token::Number(23));
        assert_eq!(Token::coerce("2"), Token::Number(2));
    }

    #[test]
    fn coerce_keeps_words_as_text() {
        assert_eq!(Token::coerce("Annual"), Token::Text("Annual".into()));
        assert_eq!(Token::coerce("1.5"), Token::Text("1.5".into()));
    }

    #[test]
    fn numeric_like_covers_fractional_text() {
        assert!(Token::Number(4).is_numeric_like());
        assert!(Token::Text("1.5".into()).is_numeric_like());
        assert!(!Token::Text("Annual".into()).is_numeric_like());
    }

    #[test]
    fn geometry_suffixes() {
        assert_eq!(Geometry::Native.suffix(), "native");
        assert_eq!(
            Geometry::Box {
                width: 300,
                height: 400
            }
            .suffix(),
            "300x400"
        );
    }
}
