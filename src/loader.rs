//! Component M — the loader interface (spec §4.M).
//!
//! Every stage implements this same minimal contract; a pipeline is a
//! chain of loaders, each wrapping the one "beneath" it (closer to the
//! raw file read), per the ordering in spec §4.L.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{PipelineError, PipelineResult};
use crate::model::FileContents;

pub trait Loader {
    fn load(&self, relative_path: &str) -> PipelineResult<FileContents>;
}

/// The leaf loader: reads a UTF-8 text file relative to a configured
/// root. This is the "raw content reader" at the bottom of spec §2's
/// data-flow diagram.
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }
}

impl Loader for FileSystemLoader {
    fn load(&self, relative_path: &str) -> PipelineResult<FileContents> {
        if relative_path.is_empty() {
            return Err(PipelineError::BadInput("empty relative path".to_string()));
        }
        if has_parent_dir_component(relative_path) {
            return Err(PipelineError::BadInput(format!("path escapes content root: {relative_path}")));
        }

        let full_path = self.resolve(relative_path);
        let metadata = fs::metadata(&full_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::NotFound(full_path.clone())
            } else {
                PipelineError::Io(e)
            }
        })?;

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let content = fs::read_to_string(&full_path)?;

        if content.is_empty() {
            return Err(PipelineError::BadInput(format!("empty file: {relative_path}")));
        }

        Ok(FileContents::new(relative_path, modified, content))
    }
}

/// Rejects any `..` path component so a request or `@import` can never
/// resolve outside the configured content root.
fn has_parent_dir_component(relative_path: &str) -> bool {
    Path::new(relative_path).components().any(|c| matches!(c, std::path::Component::ParentDir))
}

/// Joins a relative import filename to the folder containing `parent`,
/// purely for cycle-detection bookkeeping (spec §4.C step 2). Imports
/// are same-folder only, so this never needs to walk `..`.
pub fn normalize_relative_to(parent_relative_path: &str, filename: &str) -> String {
    match Path::new(parent_relative_path).parent() {
        Some(dir) if dir.as_os_str().len() > 0 => {
            format!("{}/{}", dir.to_string_lossy(), filename)
        }
        _ => filename.to_string(),
    }
}
