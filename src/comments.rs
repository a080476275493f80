//! Component B — comment stripper (spec §4.B).

use crate::model::FileContents;
use crate::scanner::{Scanner, SegmentKind};

/// Strips every CSS/LESS comment from `input.content`, replacing each
/// one with only the `\r`/`\n` characters it contained so the total
/// line count is preserved exactly. Idempotent: running it again on
/// its own output is a no-op, since there are no more Comment segments
/// left to find.
pub fn strip_comments(input: &FileContents, less_mode: bool) -> FileContents {
    let mut out = String::with_capacity(input.content.len());
    for segment in Scanner::new(&input.content, less_mode) {
        match segment.kind {
            SegmentKind::Comment => {
                for ch in segment.value.chars() {
                    if ch == '\r' || ch == '\n' {
                        out.push(ch);
                    }
                }
            }
            SegmentKind::Terminator => {}
            _ => out.push_str(segment.value),
        }
    }
    input.with_content_same_time(out)
}
