//! Component D — wrapper-tag renamer (spec §4.D).

use crate::model::FileContents;
use crate::scanner::{Scanner, SegmentKind};

/// If `input.content` is wrapped in a single outer `{tag_name} { ... }`
/// rule, substitutes `tag_name` for `sentinel` at that one occurrence
/// and returns the rest unchanged. Otherwise returns `input` unchanged.
pub fn rename_wrapper_tag(input: &FileContents, tag_name: &str, sentinel: &str) -> FileContents {
    let meaningful: Vec<_> = Scanner::new(&input.content, true)
        .filter(|s| !matches!(s.kind, SegmentKind::Whitespace | SegmentKind::Comment))
        .take(4)
        .collect();

    if meaningful.len() < 4 {
        return input.clone();
    }

    let is_wrapped = meaningful[0].kind == SegmentKind::SelectorOrStyleProperty
        && meaningful[0].value == tag_name
        && meaningful[1].kind == SegmentKind::OpenBrace
        && meaningful[2].kind == SegmentKind::SelectorOrStyleProperty
        && meaningful[3].kind != SegmentKind::StylePropertyColon;

    if !is_wrapped {
        return input.clone();
    }

    let start = meaningful[0].index_in_source;
    let end = start + meaningful[0].value.len();
    let mut new_content = String::with_capacity(input.content.len() - tag_name.len() + sentinel.len());
    new_content.push_str(&input.content[..start]);
    new_content.push_str(sentinel);
    new_content.push_str(&input.content[end..]);

    input.with_content_same_time(new_content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn fc(content: &str) -> FileContents {
        FileContents::new("test.css", SystemTime::UNIX_EPOCH, content)
    }

    #[test]
    fn renames_html_wrapper() {
        let input = fc("html { body { color: red; } }");
        let out = rename_wrapper_tag(&input, "html", "__wrapper__");
        assert_eq!(out.content, "__wrapper__ { body { color: red; } }");
    }

    #[test]
    fn leaves_property_declarations_alone() {
        let input = fc("html { color: red; }");
        let out = rename_wrapper_tag(&input, "html", "__wrapper__");
        assert_eq!(out.content, input.content);
    }

    #[test]
    fn leaves_non_wrapped_content_unchanged() {
        let input = fc("body { color: red; }");
        let out = rename_wrapper_tag(&input, "html", "__wrapper__");
        assert_eq!(out.content, input.content);
    }

    #[test]
    fn ignores_leading_comment_before_wrapper() {
        let input = fc("/* c */ html { body { color: red; } }");
        let out = rename_wrapper_tag(&input, "html", "__wrapper__");
        assert_eq!(out.content, "/* c */ __wrapper__ { body { color: red; } }");
    }

    #[test]
    fn too_short_content_is_unchanged() {
        let input = fc("html {}");
        let out = rename_wrapper_tag(&input, "html", "__wrapper__");
        assert_eq!(out.content, input.content);
    }
}
