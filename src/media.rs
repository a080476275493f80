//! Component H — media-query grouper (spec §4.H).
//!
//! Precondition (stated in spec): the input is already minified enough
//! that two `@media` headers that "mean the same thing" are byte-equal.
//! This stage does no semantic comparison, only exact string matching.

use crate::scanner::{Scanner, Segment, SegmentKind};

fn find_matching_close(segments: &[Segment], open_idx: usize) -> usize {
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

/// Groups every `@media` block by its exact header text, preserving
/// first-seen order, and moves all non-media content ahead of them.
pub fn group_media_queries(content: &str) -> String {
    let segments: Vec<_> = Scanner::new(content, true).collect();
    let mut i = 0usize;
    let mut outside = String::new();
    let mut order: Vec<String> = Vec::new();
    let mut bodies: std::collections::HashMap<String, String> = std::collections::HashMap::new();

    while i < segments.len() {
        if segments[i].kind == SegmentKind::Terminator {
            break;
        }

        if segments[i].kind == SegmentKind::SelectorOrStyleProperty && segments[i].value.eq_ignore_ascii_case("@media") {
            let header_start = segments[i].index_in_source;
            let mut j = i;
            while j < segments.len() && segments[j].kind != SegmentKind::OpenBrace {
                j += 1;
            }
            if j >= segments.len() {
                outside.push_str(&content[header_start..]);
                break;
            }
            let brace_pos = segments[j].index_in_source;
            let header = content[header_start..brace_pos].trim().to_string();

            let close_idx = find_matching_close(&segments, j);
            let body_start = brace_pos + 1;
            let body_end = segments[close_idx].index_in_source;
            let body = &content[body_start..body_end];

            bodies.entry(header.clone()).or_insert_with(|| {
                order.push(header.clone());
                String::new()
            });
            bodies.get_mut(&header).unwrap().push_str(body);

            i = close_idx + 1;
        } else {
            outside.push_str(segments[i].value);
            i += 1;
        }
    }

    let mut out = String::with_capacity(content.len());
    out.push_str(&outside);
    for header in order {
        out.push_str(&header);
        out.push('{');
        out.push_str(&bodies[&header]);
        out.push('}');
    }
    out
}
