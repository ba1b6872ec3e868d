//! Best-effort series/issue/volume recovery from comic filenames.
//!
//! Comic archives are named by whoever scanned or bought them, so there is no
//! real convention to parse. What there is, is a handful of common shapes:
//!
//! ```text
//! Saga v02 - Chapter Two.cbr         → series "Saga", volume 2
//! Fables v05 (2005) (Digital).cbz    → series "Fables", volume 5
//! Hellboy 04 of 12.cbz               → series "Hellboy", issue 4
//! Batman 023 (2011) (Webrip).cbz     → series "Batman", issue 23
//! Batman (2011) 023.cbz              → series "Batman", issue 23
//! ```
//!
//! ## Rule cascade
//!
//! [`parse`] runs an ordered list of independent rules over the cleaned stem.
//! Each rule is a pattern plus a builder; the first rule that matches wins and
//! there is no scoring. Priority order is the whole tie-break:
//!
//! 1. `<series> v<volume> - <subtitle>`
//! 2. `<series> v<volume>` followed by an opening bracket or dash
//! 3. `<series> v<volume>` at end of string
//! 4. `<series> <issue> of <count>`
//! 5. `<series> <issue>` followed by a separator
//! 6. `<series> <issue>` at end of string
//! 7. `<series>` followed by a bracketed tail
//!
//! If nothing matches, the series is everything up to the first `(` or `[`
//! and issue/volume stay empty. The parser never fails; the worst outcome is
//! a `ParsedFilename` full of `None`.
//!
//! ## Cleaning
//!
//! Before the cascade the basename is URL-decoded, repaired for the
//! double-encoding artefact where `(`/`)` turn into `_28`/`_29`, stripped of
//! its extension, and has underscores turned into spaces. After a match, the
//! series text has bracketed groups (years, scanner tags) removed and its
//! whitespace collapsed.

use crate::types::Token;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Result of parsing a comic filename.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFilename {
    pub series: Option<String>,
    pub issue: Option<Token>,
    pub volume: Option<Token>,
    /// Name of the rule that matched, `None` for the degenerate fallback.
    pub rule: Option<&'static str>,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
    build: fn(&Captures) -> ParsedFilename,
}

const VOLUME_MARK: &str = r"(?:v|vol\.?\s*|volume\s*)";
const ISSUE_MARK: &str = r"(?:part\s*)?[t#]?(\d+(?:\.\d+)?|annual)";

fn rule(name: &'static str, pattern: String, build: fn(&Captures) -> ParsedFilename) -> Rule {
    Rule {
        name,
        pattern: Regex::new(&format!("(?i){}", pattern)).expect("static filename pattern"),
        build,
    }
}

fn series_volume(caps: &Captures) -> ParsedFilename {
    ParsedFilename {
        series: caps.get(1).and_then(|m| clean_series(m.as_str())),
        volume: caps.get(2).map(|m| Token::coerce(m.as_str())),
        ..Default::default()
    }
}

fn series_issue(caps: &Captures) -> ParsedFilename {
    ParsedFilename {
        series: caps.get(1).and_then(|m| clean_series(m.as_str())),
        issue: caps.get(2).map(|m| Token::coerce(m.as_str())),
        ..Default::default()
    }
}

fn series_only(caps: &Captures) -> ParsedFilename {
    ParsedFilename {
        series: caps.get(1).and_then(|m| clean_series(m.as_str())),
        ..Default::default()
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            "volume-subtitle",
            format!(r"^(.+)\s+{VOLUME_MARK}(\d+)\s*-\s*(.+)$"),
            series_volume,
        ),
        rule(
            "volume-bracket",
            format!(r"^(.+?) {VOLUME_MARK}(\d+)\s*[-(\[]+"),
            series_volume,
        ),
        rule(
            "volume-end",
            format!(r"^(.+?) {VOLUME_MARK}(\d+)\s*$"),
            series_volume,
        ),
        rule(
            "issue-of-count",
            format!(r"^(.+?) {ISSUE_MARK}\s*[(\[]?of\s*\d+"),
            series_issue,
        ),
        rule(
            "issue-separator",
            format!(r"^(.+?) {ISSUE_MARK}\s*[-(\[]+"),
            series_issue,
        ),
        rule(
            "issue-end",
            format!(r"^(.+?) {ISSUE_MARK}\s*$"),
            series_issue,
        ),
        rule("series-bracket", r"^(.+?)\s*[(\[]".to_string(), series_only),
    ]
});

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("static bracket pattern"));

/// Parse a comic basename into series, issue and volume.
///
/// Accepts a bare filename or a full path; only the final component is used.
pub fn parse(basename: &str) -> ParsedFilename {
    let stem = clean_stem(basename);

    for rule in RULES.iter() {
        if let Some(caps) = rule.pattern.captures(&stem) {
            let mut parsed = (rule.build)(&caps);
            if parsed.series.is_some() {
                parsed.rule = Some(rule.name);
                return parsed;
            }
        }
    }

    ParsedFilename {
        series: degenerate_series(&stem),
        ..Default::default()
    }
}

/// Series fallback: characters up to the first `(` or `[`.
fn degenerate_series(stem: &str) -> Option<String> {
    let head = stem.split(['(', '[']).next().unwrap_or_default();
    let head = head.trim();
    if head.is_empty() {
        None
    } else {
        Some(head.to_string())
    }
}

/// Normalize a basename into the string the cascade runs over.
fn clean_stem(basename: &str) -> String {
    let name = basename.rsplit(['/', '\\']).next().unwrap_or(basename);

    let mut name = match urlencoding::decode(name) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => name.to_string(),
    };

    if name.matches("_28").count() > 1 && name.matches("_29").count() > 1 {
        name = name.replace("_28", "(").replace("_29", ")");
    }

    let stem = strip_extension(&name);
    stem.replace('_', " ").trim().to_string()
}

/// Remove a trailing `.ext` if it looks like a file extension.
///
/// `"Batman Vol. 2"` keeps its `. 2`; `"Batman 023.cbz"` loses `.cbz`.
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) => {
            let ext = &name[dot + 1..];
            let looks_like_ext = (1..=4).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic());
            if looks_like_ext { &name[..dot] } else { name }
        }
        None => name,
    }
}

/// Tidy a captured series name; `None` if nothing readable is left.
fn clean_series(raw: &str) -> Option<String> {
    let without_groups = BRACKETED.replace_all(raw, " ");
    let collapsed = without_groups.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(['-', ',', '#', ' ']).trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
