//! Component C — the import flattener (spec §4.C).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ImportPolicy;
use crate::error::{PipelineError, PipelineResult};
use crate::loader::{normalize_relative_to, Loader};
use crate::model::{FileContents, ImportDeclaration};

/// Matches the five `@import` shapes from spec §4.C. Capture groups:
/// 1/2/3 = `url("X")` / `url('X')` / `url(X)`; 4/5 = bare `"X"`/`'X'`.
/// Group 6 is the optional media condition text before the terminator.
static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"@import\s+(?:url\(\s*(?:"([^"]*)"|'([^']*)'|([^'")\s]+))\s*\)|"([^"]*)"|'([^']*)')\s*([^;\r\n]*?)\s*(?:;|\r|\n|$)"#,
    )
    .expect("import regex is valid")
});

/// Finds, in file order, every `@import` declaration and the exact
/// byte range of its raw text (including the terminator it consumed).
pub fn find_import_declarations(content: &str) -> Vec<(std::ops::Range<usize>, ImportDeclaration)> {
    let mut out = Vec::new();
    for caps in IMPORT_RE.captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let filename = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .or_else(|| caps.get(5))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let media_condition = caps.get(6).and_then(|m| {
            let text = m.as_str().trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        });

        out.push((
            whole.start()..whole.end(),
            ImportDeclaration { raw_text: whole.as_str().to_string(), filename, media_condition },
        ));
    }
    out
}

/// Decorator loader implementing component C. Wraps an inner loader
/// that already applies every stage below import-flattening in the
/// ordering from spec §4.L (keyframe scoping is above it, so it is
/// NOT in `inner`; comment stripping and wrapper renaming ARE).
pub struct ImportFlattener<L: Loader> {
    inner: L,
    on_circular_import: ImportPolicy,
    on_unsupported_import: ImportPolicy,
}

impl<L: Loader> ImportFlattener<L> {
    pub fn new(inner: L, on_circular_import: ImportPolicy, on_unsupported_import: ImportPolicy) -> Self {
        Self { inner, on_circular_import, on_unsupported_import }
    }

    fn load_with_chain(&self, path: &str, chain: &[String]) -> PipelineResult<FileContents> {
        let fc = self.inner.load(path)?;
        let mut next_chain = chain.to_vec();
        next_chain.push(path.to_string());

        let declarations = find_import_declarations(&fc.content);
        let mut out = String::with_capacity(fc.content.len());
        let mut last_modified = fc.last_modified;
        let mut cursor = 0usize;

        for (range, decl) in declarations {
            out.push_str(&fc.content[cursor..range.start]);
            cursor = range.end;

            if decl.filename.contains('/') || decl.filename.contains('\\') {
                match self.on_unsupported_import {
                    ImportPolicy::Strict => {
                        return Err(PipelineError::UnsupportedImport { parent: path.to_string(), raw: decl.raw_text });
                    }
                    ImportPolicy::Lenient => {
                        log::warn!("unsupported import `{}` in {} elided (lenient policy)", decl.raw_text, path);
                        continue;
                    }
                }
            }

            let target = normalize_relative_to(path, &decl.filename);

            if next_chain.iter().any(|ancestor| ancestor == &target) {
                match self.on_circular_import {
                    ImportPolicy::Strict => {
                        let mut chain_display = next_chain.clone();
                        chain_display.push(target);
                        return Err(PipelineError::CircularImport { chain: chain_display.join(" -> ") });
                    }
                    ImportPolicy::Lenient => {
                        log::warn!("circular import `{}` in {} elided (lenient policy)", decl.raw_text, path);
                        continue;
                    }
                }
            }

            let child = self.load_with_chain(&target, &next_chain)?;
            last_modified = last_modified.max(child.last_modified);

            let replacement = match &decl.media_condition {
                Some(media) => format!("@media {} {{ {} }}", media, child.content),
                None => child.content,
            };
            out.push_str(&replacement);
        }
        out.push_str(&fc.content[cursor..]);

        Ok(FileContents::new(path, last_modified, out.trim_end().to_string()))
    }
}

impl<L: Loader> Loader for ImportFlattener<L> {
    fn load(&self, relative_path: &str) -> PipelineResult<FileContents> {
        self.load_with_chain(relative_path, &[])
    }
}
