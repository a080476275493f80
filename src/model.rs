//! Core data model shared by every pipeline stage (spec §3).

use std::fmt;
use std::time::SystemTime;

/// Immutable content produced by a loader stage. Successive stages
/// produce new values with transformed `content` and possibly a later
/// `last_modified` (the max across every file that contributed).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileContents {
    pub relative_path: String,
    pub last_modified: SystemTime,
    pub content: String,
}

impl FileContents {
    pub fn new(relative_path: impl Into<String>, last_modified: SystemTime, content: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            last_modified,
            content: content.into(),
        }
    }

    /// Returns a copy with `content` replaced and `last_modified` raised
    /// to the max of the current value and `other_last_modified`. This is
    /// how every stage preserves the "freshness dominance" invariant.
    pub fn with_content(&self, content: impl Into<String>, other_last_modified: SystemTime) -> Self {
        Self {
            relative_path: self.relative_path.clone(),
            last_modified: self.last_modified.max(other_last_modified),
            content: content.into(),
        }
    }

    pub fn with_content_same_time(&self, content: impl Into<String>) -> Self {
        Self {
            relative_path: self.relative_path.clone(),
            last_modified: self.last_modified,
            content: content.into(),
        }
    }
}

/// The same shape as `FileContents`; kept as a distinct name at the
/// cache boundary because spec §3 calls it out as its own record with
/// its own on-disk format (see `cache.rs`).
pub type CacheEntry = FileContents;

/// A synthetic source-mapping selector of the form `#<ident>_<line>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub String);

impl MarkerId {
    pub fn new(ident: &str, line_number: usize) -> Self {
        Self(format!("#{ident}_{line_number}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `@import` declaration found in a file, before resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportDeclaration {
    pub raw_text: String,
    pub filename: String,
    pub media_condition: Option<String>,
}

/// `identFromFilename` transform from spec §3: take the last path
/// segment, replace anything that isn't a letter/digit/`_`/`-`/`.`
/// with `_`, collapse runs of `_`, and skip leading non-letters. If no
/// letter remains, the caller should treat this as "no identifier".
pub fn ident_from_filename(path: &str) -> Option<String> {
    let last_segment = path.rsplit(['/', '\\']).next().unwrap_or(path);

    let mut replaced = String::with_capacity(last_segment.len());
    for ch in last_segment.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
            replaced.push(ch);
        } else {
            replaced.push('_');
        }
    }

    let collapsed = collapse_underscore_runs(&replaced);

    let first_letter_index = collapsed.find(|c: char| c.is_ascii_alphabetic());
    let trimmed = match first_letter_index {
        Some(idx) => &collapsed[idx..],
        None => return None,
    };

    if trimmed.chars().any(|c| c.is_ascii_alphabetic()) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

fn collapse_underscore_runs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_was_underscore = false;
    for ch in s.chars() {
        if ch == '_' {
            if !prev_was_underscore {
                out.push(ch);
            }
            prev_was_underscore = true;
        } else {
            out.push(ch);
            prev_was_underscore = false;
        }
    }
    out
}
