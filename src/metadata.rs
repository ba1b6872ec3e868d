//! Comic metadata resolution.
//!
//! The only metadata source is the filename. [`naming::parse`] does the
//! heuristic work; this module turns its result into what the catalog
//! stores:
//!
//! - **Series**: the parsed series, or everything before the first `(`/`[`
//!   when no rule matched. Comics whose name yields nothing land in the
//!   `Unknown` sentinel series.
//! - **Issue / volume**: passed through as parsed tokens.
//!
//! ## Series keys
//!
//! The same series arrives under many spellings (`X-Men`, `X Men`,
//! `x-men`). [`normalize_series_key`] projects a display name onto its
//! lower-cased alphanumeric characters; two names with the same key are the
//! same series.

use crate::naming::{self, ParsedFilename};
use crate::types::Token;
use std::path::Path;

/// What the filename tells us about a comic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComicDescription {
    /// Display name; `None` means the Unknown series.
    pub series: Option<String>,
    pub issue: Option<Token>,
    pub volume: Option<Token>,
}

/// Describe a comic from its archive path.
pub fn describe(path: &Path) -> ComicDescription {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    from_parsed(naming::parse(&basename))
}

fn from_parsed(parsed: ParsedFilename) -> ComicDescription {
    let series = parsed
        .series
        .filter(|s| !normalize_series_key(s).is_empty());
    ComicDescription {
        series,
        issue: parsed.issue,
        volume: parsed.volume,
    }
}

/// Lower-cased alphanumeric projection of a series name.
pub fn normalize_series_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
