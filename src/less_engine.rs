//! Component G — compile adapter + selector path filter (spec §4.G).

use std::collections::HashSet;

use crate::error::PipelineResult;
use crate::model::MarkerId;
use crate::scanner::{Scanner, SegmentKind};

/// External collaborator boundary: something that turns nested
/// LESS-style rulesets into flat CSS rulesets. The pipeline never hard
/// codes a single implementation against this trait so that a real
/// LESS engine can be substituted without touching the path filter.
pub trait LessEngine {
    fn flatten(&self, content: &str) -> PipelineResult<String>;
}

/// A small, self-contained nested-selector flattener built directly on
/// the segment scanner. Desugars `outer { inner { decl; } }` into
/// `outer inner{decl;}`, the way LESS's implicit descendant nesting
/// works (no `&` parent-selector support — out of scope here).
/// `@media` bodies are recursed into and re-wrapped; `@keyframes` and
/// `@font-face` bodies are opaque and copied through untouched.
pub struct NestedSelectorFlattener;

impl NestedSelectorFlattener {
    pub fn new() -> Self {
        Self
    }

    /// Flattens one braced level. `ancestors` is the set of combined
    /// selector paths this level's direct declarations belong under;
    /// empty only for the document root, which has no ruleset of its
    /// own to emit. Nested rules are flattened depth-first and appended
    /// to `out` after this level's own (possibly empty) ruleset.
    fn flatten_block(&self, src: &str, ancestors: &[String], out: &mut String) {
        let segments: Vec<_> = Scanner::new(src, true).collect();
        let mut i = 0usize;
        let mut own_decls = String::new();
        let mut nested = String::new();

        while i < segments.len() {
            while i < segments.len() && matches!(segments[i].kind, SegmentKind::Whitespace | SegmentKind::Comment) {
                i += 1;
            }
            if i >= segments.len() || segments[i].kind == SegmentKind::Terminator {
                break;
            }
            if segments[i].kind == SegmentKind::CloseBrace {
                i += 1;
                continue;
            }

            let header_start = segments[i].index_in_source;
            let mut j = i;
            while j < segments.len()
                && !matches!(segments[j].kind, SegmentKind::OpenBrace | SegmentKind::StylePropertyColon)
            {
                j += 1;
            }

            if j >= segments.len() {
                break;
            }

            if segments[j].kind == SegmentKind::StylePropertyColon {
                // Plain declaration at this nesting level; copy verbatim.
                let mut k = j;
                while k < segments.len() && segments[k].kind != SegmentKind::SemiColon {
                    k += 1;
                }
                let decl_end = if k < segments.len() { segments[k].index_in_source + 1 } else { src.len() };
                own_decls.push_str(&src[header_start..decl_end]);
                i = k + 1;
                continue;
            }

            // Nested rule: header_start..brace is the selector list.
            let brace_idx = j;
            let brace_pos = segments[brace_idx].index_in_source;
            let selector_text = src[header_start..brace_pos].trim();

            let body_start = brace_pos + 1;
            let body_end = find_matching_close(&segments, brace_idx);
            let body_text = &src[body_start..segments[body_end].index_in_source];

            let lower = selector_text.to_ascii_lowercase();
            if lower.starts_with("@keyframes") || lower.starts_with("@font-face") {
                nested.push_str(&src[header_start..segments[body_end].index_in_source + 1]);
            } else if lower.starts_with("@media") {
                nested.push_str(selector_text);
                nested.push('{');
                self.flatten_block(body_text, ancestors, &mut nested);
                nested.push('}');
            } else {
                let combined = combine_ancestors(ancestors, selector_text);
                self.flatten_block(body_text, &combined, &mut nested);
            }

            i = body_end + 1;
        }

        if !ancestors.is_empty() {
            out.push_str(&ancestors.join(","));
            out.push('{');
            out.push_str(&own_decls);
            out.push('}');
        }
        out.push_str(&nested);
    }
}

impl Default for NestedSelectorFlattener {
    fn default() -> Self {
        Self::new()
    }
}

impl LessEngine for NestedSelectorFlattener {
    fn flatten(&self, content: &str) -> PipelineResult<String> {
        let mut out = String::with_capacity(content.len());
        self.flatten_block(content, &[], &mut out);
        Ok(out)
    }
}

fn find_matching_close(segments: &[crate::scanner::Segment], open_idx: usize) -> usize {
    let mut depth = 0i32;
    let mut i = open_idx;
    while i < segments.len() {
        match segments[i].kind {
            SegmentKind::OpenBrace => depth += 1,
            SegmentKind::CloseBrace => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    segments.len().saturating_sub(1)
}

fn combine_ancestors(ancestors: &[String], selector_text: &str) -> Vec<String> {
    let parts: Vec<&str> = selector_text.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    if ancestors.is_empty() {
        return parts.into_iter().map(|s| s.to_string()).collect();
    }
    let mut combined = Vec::with_capacity(ancestors.len() * parts.len());
    for a in ancestors {
        for p in &parts {
            combined.push(format!("{a} {p}"));
        }
    }
    combined
}

/// Applies the selector-path survival rules from spec §4.G to one
/// declaration's selector list (comma-separated, no outer braces).
pub fn filter_selector_paths(selector_list: &str, marker_ids: &[MarkerId], sentinel: Option<&str>) -> String {
    let markers: HashSet<&str> = marker_ids.iter().map(|m| m.as_str()).collect();
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut survivors: Vec<String> = Vec::new();

    for path in selector_list.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let compounds: Vec<&str> = path.split_whitespace().collect();
        if compounds.is_empty() {
            continue;
        }

        let polluted = compounds.iter().any(|c| {
            !markers.contains(c) && markers.iter().any(|m| c.starts_with(m) && c.len() > m.len())
        });
        if polluted {
            continue;
        }

        let marker_positions: Vec<usize> =
            compounds.iter().enumerate().filter(|(_, c)| markers.contains(*c)).map(|(i, _)| i).collect();

        if !marker_positions.is_empty() {
            let last = compounds.len() - 1;
            if marker_positions.len() > 1 || marker_positions[0] != last {
                continue;
            }
            let marker = compounds[last];
            if emitted.contains(marker) {
                continue;
            }
            emitted.insert(marker);
            survivors.push(marker.to_string());
            continue;
        }

        // No markers in this path: keep, optionally stripping the sentinel.
        match sentinel {
            None => survivors.push(path.to_string()),
            Some(tag) => {
                let stripped: Vec<&str> = compounds.iter().map(|c| *c).filter(|c| *c != tag).collect();
                if !stripped.is_empty() {
                    survivors.push(stripped.join(" "));
                }
            }
        }
    }

    survivors.join(",")
}

/// Walks already-flattened CSS (no more nested rulesets left to
/// descend into beyond `@media`) and applies `filter_selector_paths`
/// to every ruleset's selector list, dropping rulesets that end up
/// with no surviving selectors. `@keyframes`/`@font-face` bodies are
/// copied through untouched — their "selectors" are percentages/
/// keywords, not the marker-bearing selector paths this filter exists
/// for. This is the document-level visitor spec §4.G describes the
/// LESS engine integration calling per rule set.
pub fn filter_document(content: &str, marker_ids: &[MarkerId], sentinel: Option<&str>) -> String {
    let mut out = String::with_capacity(content.len());
    filter_block(content, marker_ids, sentinel, &mut out);
    out
}

fn filter_block(src: &str, marker_ids: &[MarkerId], sentinel: Option<&str>, out: &mut String) {
    let segments: Vec<_> = Scanner::new(src, true).collect();
    let mut i = 0usize;

    while i < segments.len() {
        while i < segments.len() && matches!(segments[i].kind, SegmentKind::Whitespace | SegmentKind::Comment) {
            i += 1;
        }
        if i >= segments.len() || segments[i].kind == SegmentKind::Terminator {
            break;
        }
        if segments[i].kind == SegmentKind::CloseBrace {
            i += 1;
            continue;
        }

        let header_start = segments[i].index_in_source;
        let mut j = i;
        while j < segments.len() && segments[j].kind != SegmentKind::OpenBrace {
            j += 1;
        }
        if j >= segments.len() {
            out.push_str(&src[header_start..]);
            break;
        }

        let brace_pos = segments[j].index_in_source;
        let header_text = src[header_start..brace_pos].trim();
        let body_end_idx = find_matching_close(&segments, j);
        let body_start = brace_pos + 1;
        let body_end = segments[body_end_idx].index_in_source;
        let body_text = &src[body_start..body_end];

        let lower = header_text.to_ascii_lowercase();
        if lower.starts_with("@keyframes") || lower.starts_with("@font-face") {
            out.push_str(&src[header_start..body_end + 1]);
        } else if lower.starts_with("@media") {
            out.push_str(header_text);
            out.push('{');
            filter_block(body_text, marker_ids, sentinel, out);
            out.push('}');
        } else {
            let filtered = filter_selector_paths(header_text, marker_ids, sentinel);
            if !filtered.is_empty() {
                out.push_str(&filtered);
                out.push('{');
                out.push_str(body_text);
                out.push('}');
            }
        }

        i = body_end_idx + 1;
    }
}
