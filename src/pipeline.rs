//! Component L — the pipeline assembler (spec §4.L) and the §6 inbound
//! `process()` contract.
//!
//! Wires components A–K into the single chain spec §4.L specifies,
//! outermost (last-applied) to innermost (closest to the raw file
//! read):
//!
//! ```text
//! mediaQueryGrouper -> minifier -> lessCompiler(+selector filter)
//!   -> importFlattener -> keyframeScoper -> markerInserter
//!   -> commentStripper -> wrapperRenamer -> fileReader
//! ```
//!
//! The minifier is not named in spec §4.L's ordering list, but §4.H
//! states grouping requires already-minified input as a precondition,
//! so it sits between the compiler and the grouper (see DESIGN.md).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Instant, SystemTime};

use crate::cache::{CacheLayer, DiskCache, LayeredCache, MemoryCache};
use crate::comments::strip_comments;
use crate::config::{CompilerErrorPolicy, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::freshness::FreshnessRetriever;
use crate::imports::ImportFlattener;
use crate::keyframes::scope_keyframes;
use crate::less_engine::{filter_document, LessEngine, NestedSelectorFlattener};
use crate::loader::{FileSystemLoader, Loader};
use crate::markers::{insert_markers, MarkerGenerator};
use crate::media::group_media_queries;
use crate::minify::minify;
use crate::model::FileContents;
use crate::wrapper::rename_wrapper_tag;

/// The result of `Pipeline::process`, mirroring spec §6's three
/// outcomes. `Error` is not a variant here — pipeline failures are
/// surfaced as `Err(PipelineError)` instead, matching every other
/// stage's contract; the HTTP front end maps that to `Error{message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    NotModified,
    Success { body: String, last_modified: SystemTime },
}

/// Composes components B–K for one configured loader (the "default" or
/// "enhanced" composition from spec §4.L, or any custom `PipelineConfig`).
/// Built once at startup; safe to share behind an `Arc` across requests
/// since the only per-request mutable state (the marker generator) is
/// created fresh inside `run_pipeline` for every regeneration.
pub struct Pipeline {
    config: PipelineConfig,
    less_engine: Box<dyn LessEngine + Send + Sync>,
    cache: LayeredCache,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_less_engine(config, Box::new(NestedSelectorFlattener::new()))
    }

    pub fn with_less_engine(config: PipelineConfig, less_engine: Box<dyn LessEngine + Send + Sync>) -> Self {
        let layers: Vec<Box<dyn CacheLayer>> = vec![
            Box::new(MemoryCache::new()),
            Box::new(DiskCache::new(config.cache_root.clone(), config.invalid_cache_behaviour)),
        ];
        let freshness = FreshnessRetriever::new(config.content_root.clone());
        let cache = LayeredCache::new(layers, freshness, config.watched_extensions.clone());
        Self { config, less_engine, cache }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Spec §6 inbound entry point. `if_modified_since` is the request's
    /// conditional-GET timestamp, already parsed and truncated to whole
    /// seconds by the HTTP collaborator.
    pub fn process(&self, relative_path: &str, if_modified_since: Option<SystemTime>) -> PipelineResult<ProcessOutcome> {
        if relative_path.is_empty() {
            return Err(PipelineError::BadInput("empty relative path".to_string()));
        }

        let freshness_ts = self.cache.freshness_timestamp(relative_path)?;

        if let Some(ims) = if_modified_since {
            if ims >= freshness_ts || dates_equal_within_one_second(ims, freshness_ts) {
                return Ok(ProcessOutcome::NotModified);
            }
        }

        let entry = self.cache.get_or_regenerate(relative_path, || {
            let started = Instant::now();
            let content = self.run_pipeline(relative_path)?;
            let elapsed_ms = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);
            Ok((content, elapsed_ms))
        })?;

        Ok(ProcessOutcome::Success { body: entry.content, last_modified: entry.last_modified })
    }

    /// Runs components B–I (J/K wrap this from the outside via the
    /// cache's `get_or_regenerate`) for one top-level request path.
    fn run_pipeline(&self, relative_path: &str) -> PipelineResult<String> {
        let generator = Rc::new(RefCell::new(MarkerGenerator::new()));
        let per_file = PerFileLoader {
            fs: FileSystemLoader::new(self.config.content_root.clone()),
            config: &self.config,
            generator: generator.clone(),
        };
        let flattener = ImportFlattener::new(per_file, self.config.on_circular_import, self.config.on_unsupported_import);
        let flattened = flattener.load(relative_path)?;

        let compiled = match self.less_engine.flatten(&flattened.content) {
            Ok(css) => css,
            Err(e) => match self.config.on_compiler_error {
                CompilerErrorPolicy::Raise => return Err(e),
                CompilerErrorPolicy::WarnAndContinue => {
                    log::warn!("LESS compiler error for {relative_path}: {e}; falling back to unflattened content");
                    flattened.content
                }
            },
        };

        let filtered = {
            let gen = generator.borrow();
            filter_document(&compiled, gen.recorded(), self.config.sentinel_tag.as_deref())
        };

        let minified = minify(&filtered);

        Ok(if self.config.group_media_queries { group_media_queries(&minified) } else { minified })
    }
}

/// Per-spec §6: "Dates are considered equal when `|a - b| < 1 second`."
/// HTTP dates round to whole seconds while file timestamps are
/// sub-second, so an exact comparison would almost never match.
fn dates_equal_within_one_second(a: SystemTime, b: SystemTime) -> bool {
    let diff = if a >= b { a.duration_since(b) } else { b.duration_since(a) };
    diff.map(|d| d < std::time::Duration::from_secs(1)).unwrap_or(false)
}

/// The four innermost stages from spec §4.L's ordering (D, B, E, F),
/// applied to every individual file the import flattener (C) loads —
/// including every file reached recursively through `@import`. All
/// four share one `MarkerGenerator` for the lifetime of the pipeline
/// invocation, so marker ids stay unique per `(file, line)` across the
/// whole import tree, not just within one file.
struct PerFileLoader<'a> {
    fs: FileSystemLoader,
    config: &'a PipelineConfig,
    generator: Rc<RefCell<MarkerGenerator>>,
}

impl<'a> Loader for PerFileLoader<'a> {
    fn load(&self, relative_path: &str) -> PipelineResult<FileContents> {
        let raw = self.fs.load(relative_path)?;

        let wrapped = match (&self.config.tag_to_remove, &self.config.sentinel_tag) {
            (Some(tag), Some(sentinel)) => rename_wrapper_tag(&raw, tag, sentinel),
            _ => raw,
        };

        let stripped = strip_comments(&wrapped, true);

        let marked_content = {
            let mut gen = self.generator.borrow_mut();
            insert_markers(relative_path, &stripped.content, &mut gen, self.config.marker_injection)
        };
        let marked = stripped.with_content_same_time(marked_content);

        Ok(scope_keyframes(&marked))
    }
}
