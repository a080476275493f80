//! Component I — minifier (spec §4.I). Applied once, as the final CSS
//! step, after compilation and selector filtering.

use once_cell::sync::Lazy;
use regex::Regex;

static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static TAG_BEFORE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+#").unwrap());
static NEWLINE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\r\n][\s]*").unwrap());
static WHITESPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\x0c]+").unwrap());
static PUNCT_WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*([:,;{}])\s*").unwrap());
static ZERO_UNIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b0\s+(px|pt|%|em)").unwrap());

/// Runs the eight ordered minification operations from spec §4.I.
pub fn minify(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut out = format!("{trimmed}/**/");
    out = COMMENT_RE.replace_all(&out, "").into_owned();
    out = TAG_BEFORE_ID_RE.replace_all(&out, "#").into_owned();
    out = NEWLINE_RUN_RE.replace_all(&out, "").into_owned();
    out = WHITESPACE_RUN_RE.replace_all(&out, " ").into_owned();
    out = PUNCT_WHITESPACE_RE.replace_all(&out, "$1").into_owned();
    out = out.replace(";}", "}");
    out = ZERO_UNIT_RE.replace_all(&out, "0$1").into_owned();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_comment_is_closed_before_minifying() {
        let input = "/* Test 1 */\r\np { color: blue; }\r\n/*\r\n";
        assert_eq!(minify(input), "p{color:blue}");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(minify("   \r\n\t  "), "");
    }

    #[test]
    fn drops_redundant_tag_name_before_id() {
        assert_eq!(minify("div#Header { color: red; }"), "#Header{color:red}");
    }

    #[test]
    fn normalises_zero_with_unit() {
        assert_eq!(minify("p { margin: 0 px 0 em; }"), "p{margin:0px 0em}");
    }

    #[test]
    fn unterminated_comment_at_eof_is_fully_removed() {
        let input = "p { color: red; } /* oops";
        assert_eq!(minify(input), "p{color:red}");
    }
}
