//! Component J — last-modified retriever (spec §4.J).
//!
//! Used by the cache's freshness gate (component K) to decide whether a
//! cached entry is still valid, independently of the raw mtime of any
//! single file: a stylesheet's freshness is the max mtime across every
//! file in its folder that could have contributed to its content
//! (imports live alongside the file that imports them, per component C).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{PipelineError, PipelineResult};

/// Resolves a logical path's folder under a configured root and
/// reports the newest modification time among the files there.
pub struct FreshnessRetriever {
    root: PathBuf,
}

impl FreshnessRetriever {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the max mtime across files in `logical_path`'s folder,
    /// filtered by `extensions` (case-insensitive; empty means "all").
    /// `logical_path` itself need not exist: callers may ask for the
    /// freshness of a virtual aggregate path whose folder is real but
    /// whose own file is not (e.g. a directory bundle). The folder
    /// itself must exist and be readable.
    pub fn last_modified(&self, logical_path: &str, extensions: &[String]) -> PipelineResult<SystemTime> {
        let folder = self.resolve_folder(logical_path);
        let entries = fs::read_dir(&folder).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::NotFound(folder.clone())
            } else {
                PipelineError::Io(e)
            }
        })?;

        let mut newest: Option<SystemTime> = None;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if !extensions.is_empty() && !matches_extension(&path, extensions) {
                continue;
            }
            let modified = entry.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            newest = Some(match newest {
                Some(current) => current.max(modified),
                None => modified,
            });
        }

        Ok(newest.unwrap_or(SystemTime::UNIX_EPOCH))
    }

    fn resolve_folder(&self, logical_path: &str) -> PathBuf {
        match Path::new(logical_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => self.root.join(dir),
            None => self.root.clone(),
        }
    }
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str, when: SystemTime) {
        let mut f = File::create(path).unwrap();
        write!(f, "{content}").unwrap();
        drop(f);
        f = File::options().write(true).open(path).unwrap();
        let _ = f;
        filetime_set(path, when);
    }

    // Avoids pulling in the `filetime` crate for one test helper: sets
    // mtime via the platform syscall that `std` otherwise only reads.
    fn filetime_set(path: &Path, when: SystemTime) {
        use std::time::UNIX_EPOCH;
        let secs = when.duration_since(UNIX_EPOCH).unwrap().as_secs() as libc::time_t;
        let c_path = std::ffi::CString::new(path.to_str().unwrap()).unwrap();
        let times = [
            libc::timespec { tv_sec: secs, tv_nsec: 0 },
            libc::timespec { tv_sec: secs, tv_nsec: 0 },
        ];
        unsafe {
            libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0);
        }
    }

    #[test]
    fn reports_max_mtime_across_filtered_extensions() {
        let dir = TempDir::new().unwrap();
        let older = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let newer = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000);
        touch(&dir.path().join("a.css"), "a", older);
        touch(&dir.path().join("b.css"), "b", newer);
        touch(&dir.path().join("c.txt"), "c", newer + Duration::from_secs(5_000));

        let retriever = FreshnessRetriever::new(dir.path());
        let exts = vec!["css".to_string()];
        let result = retriever.last_modified("irrelevant.css", &exts).unwrap();
        assert_eq!(result, newer);
    }

    #[test]
    fn virtual_logical_path_need_not_exist() {
        let dir = TempDir::new().unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(500);
        touch(&dir.path().join("real.css"), "x", when);

        let retriever = FreshnessRetriever::new(dir.path());
        let result = retriever.last_modified("does-not-exist.css", &[]).unwrap();
        assert_eq!(result, when);
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        let retriever = FreshnessRetriever::new(dir.path());
        let err = retriever.last_modified("missing/leaf.css", &[]).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn empty_folder_falls_back_to_epoch() {
        let dir = TempDir::new().unwrap();
        let retriever = FreshnessRetriever::new(dir.path());
        let result = retriever.last_modified("anything.css", &[]).unwrap();
        assert_eq!(result, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn nested_path_resolves_its_own_subfolder() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(777);
        touch(&dir.path().join("sub").join("leaf.less"), "x", when);

        let retriever = FreshnessRetriever::new(dir.path());
        let exts = vec!["less".to_string()];
        let result = retriever.last_modified("sub/leaf.less", &exts).unwrap();
        assert_eq!(result, when);
    }
}
