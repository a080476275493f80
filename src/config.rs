//! Pipeline configuration (spec §6 "Configuration options" + §4.L).
//!
//! One struct per composition rather than deep inheritance, per the
//! design notes: `PipelineConfig::default_composition()` and
//! `PipelineConfig::enhanced_composition()` are just two instances.

use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerInjection {
    Off,
    AllSelectors,
    SkipBareElements,
    /// Like `SkipBareElements`, but a bare-element selector that is the
    /// sole member of its comma-separated list is additionally skipped
    /// even when nested, reducing marker noise further still.
    SkipIsolatedBareElements,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportPolicy {
    Strict,
    Lenient,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompilerErrorPolicy {
    Raise,
    WarnAndContinue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidCacheBehaviour {
    Delete,
    Ignore,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Outer selector to strip (wrapper-tag renamer, component D). `None`
    /// means the wrapper renamer is skipped entirely.
    pub tag_to_remove: Option<String>,
    /// Sentinel used in place of `tag_to_remove` until the LESS path
    /// filter (component G) strips it from final selector paths.
    pub sentinel_tag: Option<String>,
    pub marker_injection: MarkerInjection,
    pub group_media_queries: bool,
    pub on_circular_import: ImportPolicy,
    pub on_unsupported_import: ImportPolicy,
    pub on_compiler_error: CompilerErrorPolicy,
    pub invalid_cache_behaviour: InvalidCacheBehaviour,
    /// Root directory that relative paths in loader calls are resolved
    /// against.
    pub content_root: PathBuf,
    /// Where disk-cache files are written. Defaults to `content_root`
    /// but can be pointed elsewhere when the content root is read-only.
    pub cache_root: PathBuf,
    /// Extensions considered by the last-modified retriever (component
    /// J). Empty means "all files".
    pub watched_extensions: Vec<String>,
}

impl PipelineConfig {
    /// wrapperRenamer=off, markerInserter=on(all selectors),
    /// keyframeScoper=on, importFlattener=on, lessCompiler=on (sentinel
    /// none), minifier=on, mediaQueryGrouper=off.
    pub fn default_composition(content_root: impl Into<PathBuf>) -> Self {
        let content_root = content_root.into();
        Self {
            tag_to_remove: None,
            sentinel_tag: None,
            marker_injection: MarkerInjection::AllSelectors,
            group_media_queries: false,
            on_circular_import: ImportPolicy::Strict,
            on_unsupported_import: ImportPolicy::Strict,
            on_compiler_error: CompilerErrorPolicy::Raise,
            invalid_cache_behaviour: InvalidCacheBehaviour::Delete,
            cache_root: content_root.clone(),
            content_root,
            watched_extensions: vec!["css".to_string(), "less".to_string()],
        }
    }

    /// wrapperRenamer=on(tag=`html`, sentinel configurable),
    /// markerInserter=on(skip bare elements), keyframeScoper=on,
    /// importFlattener=on, lessCompiler=on (marker filter + sentinel),
    /// minifier=on, mediaQueryGrouper=on.
    pub fn enhanced_composition(content_root: impl Into<PathBuf>) -> Self {
        let content_root = content_root.into();
        Self {
            tag_to_remove: Some("html".to_string()),
            sentinel_tag: Some("__wrapper__".to_string()),
            marker_injection: MarkerInjection::SkipBareElements,
            group_media_queries: true,
            on_circular_import: ImportPolicy::Lenient,
            on_unsupported_import: ImportPolicy::Lenient,
            on_compiler_error: CompilerErrorPolicy::WarnAndContinue,
            invalid_cache_behaviour: InvalidCacheBehaviour::Ignore,
            cache_root: content_root.clone(),
            content_root,
            watched_extensions: vec!["css".to_string(), "less".to_string()],
        }
    }
}
