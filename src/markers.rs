//! Component E — marker generator + inserter (spec §4.E).
//!
//! The generator and inserter are described separately in spec.md
//! because the generator is also shared with component G (the LESS
//! path filter reads its recorded ids). Both live in this module since
//! the inserter is the generator's only producer.

use crate::config::MarkerInjection;
use crate::model::{ident_from_filename, MarkerId};

/// Owns the append-only, ordered list of marker ids produced during one
/// pipeline invocation. Created fresh per request (spec §5); the
/// inserter holds `&mut`, everything else (component G) holds `&`.
#[derive(Default)]
pub struct MarkerGenerator {
    recorded: Vec<MarkerId>,
}

impl MarkerGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces the id for `(relative_path, line_number)`, recording it,
    /// and returns the insertable text `"<markerId>,"`.
    pub fn generate(&mut self, relative_path: &str, line_number: usize) -> String {
        let ident = ident_from_filename(relative_path).unwrap_or_else(|| "scope".to_string());
        let id = MarkerId::new(&ident, line_number);
        let text = format!("{id},");
        self.recorded.push(id);
        text
    }

    pub fn recorded(&self) -> &[MarkerId] {
        &self.recorded
    }
}

/// A bare-element selector has none of `. # : [ >` and no `,` — spec
/// §4.E / GLOSSARY. Both `SkipBareElements` and
/// `SkipIsolatedBareElements` veto insertion for these; the pack gives
/// no test that distinguishes the two further (see DESIGN.md).
fn is_bare_element_selector(header_text: &str) -> bool {
    let trimmed = header_text.trim();
    if trimmed.is_empty() {
        return false;
    }
    !trimmed.contains(['.', '#', ':', '[', '>', ','])
}

fn should_insert(marker_injection: MarkerInjection, header_text: &str) -> bool {
    match marker_injection {
        MarkerInjection::Off => false,
        MarkerInjection::AllSelectors => true,
        MarkerInjection::SkipBareElements | MarkerInjection::SkipIsolatedBareElements => {
            !is_bare_element_selector(header_text)
        }
    }
}

enum HeaderState {
    Standard,
    Header { brace_pos: usize, locked_line: Option<usize> },
}

/// Walks `content` in reverse, inserting a marker before each
/// declaration header that survives the injection policy. Line
/// endings are normalised to `\n` first, per spec.
pub fn insert_markers(
    relative_path: &str,
    content: &str,
    generator: &mut MarkerGenerator,
    marker_injection: MarkerInjection,
) -> String {
    if marker_injection == MarkerInjection::Off {
        return content.replace("\r\n", "\n").replace('\r', "\n");
    }

    let normalised = content.replace("\r\n", "\n").replace('\r', "\n");
    let chars: Vec<(usize, char)> = normalised.char_indices().collect();
    let mut line_number = 1 + normalised.matches('\n').count();
    let mut state = HeaderState::Standard;
    let mut insertions: Vec<(usize, String)> = Vec::new();

    let mut emit = |byte_pos: usize,
                    header_start: usize,
                    header_end: usize,
                    locked_line: Option<usize>,
                    line_number: usize,
                    generator: &mut MarkerGenerator,
                    insertions: &mut Vec<(usize, String)>| {
        let header_text = &normalised[header_start..header_end];
        if should_insert(marker_injection, header_text) {
            let line = locked_line.unwrap_or(line_number);
            let text = generator.generate(relative_path, line);
            insertions.push((header_start, text));
        }
        let _ = byte_pos;
    };

    for i in (0..chars.len()).rev() {
        let (byte_pos, ch) = chars[i];
        match &mut state {
            HeaderState::Standard => {
                if ch == '\n' {
                    line_number -= 1;
                } else if ch == '{' {
                    state = HeaderState::Header { brace_pos: byte_pos, locked_line: None };
                }
            }
            HeaderState::Header { brace_pos, locked_line } => {
                if ch == '\n' {
                    line_number -= 1;
                    continue;
                }
                if ch.is_whitespace() {
                    continue;
                }
                if locked_line.is_none() {
                    *locked_line = Some(line_number);
                }
                match ch {
                    '}' | ';' => {
                        let header_start = byte_pos + ch.len_utf8();
                        let header_end = *brace_pos;
                        emit(byte_pos, header_start, header_end, *locked_line, line_number, generator, &mut insertions);
                        state = HeaderState::Standard;
                    }
                    '{' => {
                        let header_start = byte_pos + ch.len_utf8();
                        let header_end = *brace_pos;
                        emit(byte_pos, header_start, header_end, *locked_line, line_number, generator, &mut insertions);
                        state = HeaderState::Header { brace_pos: byte_pos, locked_line: None };
                    }
                    ')' | '@' => {
                        state = HeaderState::Standard;
                    }
                    _ => {}
                }
            }
        }
    }

    if let HeaderState::Header { brace_pos, locked_line } = state {
        emit(0, 0, brace_pos, locked_line, line_number, generator, &mut insertions);
    }

    insertions.sort_by_key(|(pos, _)| *pos);
    let mut out = String::with_capacity(normalised.len() + insertions.len() * 16);
    let mut cursor = 0usize;
    for (pos, text) in insertions {
        out.push_str(&normalised[cursor..pos]);
        out.push_str(&text);
        cursor = pos;
    }
    out.push_str(&normalised[cursor..]);
    out
}
