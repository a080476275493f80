//! Component F — keyframe scoper (spec §4.F).

use std::collections::HashMap;
use std::ops::Range;

use crate::model::{ident_from_filename, FileContents};
use crate::scanner::{Scanner, SegmentKind};

fn derive_prefix(relative_path: &str) -> String {
    let last_segment = relative_path.rsplit(['/', '\\']).next().unwrap_or(relative_path);
    let stem = match last_segment.rfind('.') {
        Some(idx) if idx > 0 => &last_segment[..idx],
        _ => last_segment,
    };
    match ident_from_filename(stem) {
        Some(ident) => ident,
        None => format!("scope{}", fnv1a(relative_path.as_bytes())),
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn is_animation_property(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "animation" || lower == "animation-name" || lower.ends_with("-animation") || lower.ends_with("-animation-name")
}

/// Renames every `@keyframes NAME { ... }` nested at brace depth ≥ 1 to
/// `<prefix>_NAME`, and rewrites matching `animation`/`animation-name`
/// value tokens that reference it. Top-level keyframes are untouched.
pub fn scope_keyframes(input: &FileContents) -> FileContents {
    let segments: Vec<_> = Scanner::new(&input.content, true).collect();
    let meaningful: Vec<usize> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| !matches!(s.kind, SegmentKind::Whitespace | SegmentKind::Comment))
        .map(|(i, _)| i)
        .collect();

    let prefix = derive_prefix(&input.relative_path);
    // lowercased NAME -> (original NAME, prefixed replacement)
    let mut renamed: HashMap<String, (String, String)> = HashMap::new();
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();

    let mut depth: usize = 0;
    let mut k = 0usize;
    while k < meaningful.len() {
        let idx = meaningful[k];
        match segments[idx].kind {
            SegmentKind::OpenBrace => depth += 1,
            SegmentKind::CloseBrace => depth = depth.saturating_sub(1),
            SegmentKind::SelectorOrStyleProperty if segments[idx].value.eq_ignore_ascii_case("@keyframes") => {
                if depth >= 1 {
                    if let Some(&name_idx) = meaningful.get(k + 1) {
                        if segments[name_idx].kind == SegmentKind::SelectorOrStyleProperty {
                            let name = segments[name_idx].value;
                            let prefixed = format!("{prefix}_{name}");
                            let start = segments[name_idx].index_in_source;
                            let end = start + name.len();
                            edits.push((start..end, prefixed.clone()));
                            renamed.insert(name.to_ascii_lowercase(), (name.to_string(), prefixed));
                        }
                    }
                }
            }
            _ => {}
        }
        k += 1;
    }

    if !renamed.is_empty() {
        // Second pass: rewrite animation-name references.
        let mut k = 0usize;
        while k < meaningful.len() {
            let idx = meaningful[k];
            let is_property = segments[idx].kind == SegmentKind::SelectorOrStyleProperty
                && meaningful.get(k + 1).map(|&n| segments[n].kind) == Some(SegmentKind::StylePropertyColon)
                && is_animation_property(segments[idx].value);

            if is_property {
                let mut j = k + 2;
                while j < meaningful.len() {
                    let vidx = meaningful[j];
                    match segments[vidx].kind {
                        SegmentKind::Value => {
                            if let Some((_, prefixed)) = renamed.get(&segments[vidx].value.to_ascii_lowercase()) {
                                let start = segments[vidx].index_in_source;
                                let end = start + segments[vidx].value.len();
                                edits.push((start..end, prefixed.clone()));
                            }
                            j += 1;
                        }
                        SegmentKind::SemiColon | SegmentKind::CloseBrace | SegmentKind::OpenBrace => break,
                        _ => j += 1,
                    }
                }
            }
            k += 1;
        }
    }

    if edits.is_empty() {
        return input.clone();
    }

    edits.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(input.content.len());
    let mut cursor = 0usize;
    for (range, replacement) in edits {
        out.push_str(&input.content[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&input.content[cursor..]);

    input.with_content_same_time(out)
}
