//! Component K — two-tier cache (spec §4.K).
//!
//! Generalizes the teacher's build-once `OptimizedCache` (a lock-free,
//! read-mostly map filled once at startup) into a mutable, layered
//! cache that can be populated and invalidated on every request: a
//! stylesheet's dependencies can change between requests, so freshness
//! has to be checked every time instead of assumed from a single
//! startup scan.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Timelike, Utc};
use parking_lot::Mutex;

use crate::config::InvalidCacheBehaviour;
use crate::error::{PipelineError, PipelineResult};
use crate::freshness::FreshnessRetriever;
use crate::model::CacheEntry;

const LENGTH_FIELD_WIDTH: usize = 10; // decimal width of i32::MAX
const ELAPSED_FIELD_WIDTH: usize = 5;
const ELAPSED_FIELD_CAP: u32 = 99_999;

/// One storage tier. A `LayeredCache` holds an ordered list of these
/// and queries them front to back.
pub trait CacheLayer: Send + Sync {
    fn get(&self, key: &str) -> PipelineResult<Option<CacheEntry>>;
    fn put(&self, key: &str, entry: &CacheEntry, elapsed_ms: u32) -> PipelineResult<()>;
    fn remove(&self, key: &str) -> PipelineResult<()>;
}

/// In-process memory tier. A plain mutex-guarded map is enough here:
/// spec §5 accepts last-writer-wins races and duplicate regenerations,
/// so there is no need for the teacher's atomic-RCU trick, which only
/// paid for itself because its cache was built once and never written
/// again.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheLayer for MemoryCache {
    fn get(&self, key: &str) -> PipelineResult<Option<CacheEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, entry: &CacheEntry, _elapsed_ms: u32) -> PipelineResult<()> {
        self.entries.lock().insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> PipelineResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// On-disk tier. One file per key, named `<key>.cache` under `root`,
/// in the bit-exact format from spec §3/§6.
pub struct DiskCache {
    root: PathBuf,
    invalid_cache_behaviour: InvalidCacheBehaviour,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>, invalid_cache_behaviour: InvalidCacheBehaviour) -> Self {
        Self { root: root.into(), invalid_cache_behaviour }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.cache"))
    }
}

impl CacheLayer for DiskCache {
    fn get(&self, key: &str) -> PipelineResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::Io(e)),
        };

        match parse_cache_file(&bytes) {
            Ok((relative_path, last_modified, _elapsed_ms, content)) => {
                Ok(Some(CacheEntry::new(relative_path, last_modified, content)))
            }
            Err(reason) => {
                log::warn!("invalid cache file at {}: {reason}", path.display());
                if matches!(self.invalid_cache_behaviour, InvalidCacheBehaviour::Delete) {
                    let _ = fs::remove_file(&path);
                }
                Ok(None)
            }
        }
    }

    fn put(&self, key: &str, entry: &CacheEntry, elapsed_ms: u32) -> PipelineResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let header = format_header(&entry.relative_path, entry.last_modified, elapsed_ms);
        let mut bytes = Vec::with_capacity(header.len() + 1 + entry.content.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.push(b'\n');
        bytes.extend_from_slice(entry.content.as_bytes());

        // Write-to-temp-then-rename so a cancelled write never leaves a
        // half-written file visible under the target name (spec §5).
        let tmp_path = path.with_file_name(format!(
            "{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("entry"),
            std::process::id()
        ));
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> PipelineResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Io(e)),
        }
    }
}

fn format_header(relative_path: &str, last_modified: SystemTime, elapsed_ms: u32) -> String {
    let len_field = format!("{:0width$}", relative_path.len(), width = LENGTH_FIELD_WIDTH);
    let elapsed_field = format!("{:0width$}", elapsed_ms.min(ELAPSED_FIELD_CAP), width = ELAPSED_FIELD_WIDTH);
    let datetime: DateTime<Utc> = last_modified.into();
    let date_part = datetime.format("%Y-%m-%d %H:%M:%S").to_string();
    // "fffffff": 100ns ticks, to the width spec's format string calls for.
    let ticks = datetime.timestamp_subsec_nanos() / 100;
    format!("/*{len_field}:{relative_path}:{date_part}.{ticks:07}:{elapsed_field}ms*/")
}

type ParsedHeader = (String, SystemTime, u32, String);

fn parse_cache_file(bytes: &[u8]) -> Result<ParsedHeader, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    let rest = text.strip_prefix("/*").ok_or("missing header sentinel")?;

    let (len_field, rest) = rest.split_once(':').ok_or("missing length separator")?;
    if len_field.len() != LENGTH_FIELD_WIDTH || !len_field.bytes().all(|b| b.is_ascii_digit()) {
        return Err("malformed length field".to_string());
    }
    let path_len: usize = len_field.parse().map_err(|_| "unparsable length field")?;
    if rest.len() < path_len {
        return Err("declared path length exceeds file".to_string());
    }

    let relative_path = &rest[..path_len];
    let rest = &rest[path_len..];
    let rest = rest.strip_prefix(':').ok_or("missing path separator")?;

    let (ts_field, rest) = rest.split_once(':').ok_or("missing timestamp separator")?;
    let last_modified = parse_timestamp(ts_field).ok_or("malformed timestamp field")?;

    if rest.len() < ELAPSED_FIELD_WIDTH {
        return Err("truncated elapsed field".to_string());
    }
    let (elapsed_field, rest) = rest.split_at(ELAPSED_FIELD_WIDTH);
    if !elapsed_field.bytes().all(|b| b.is_ascii_digit()) {
        return Err("malformed elapsed field".to_string());
    }
    let elapsed_ms: u32 = elapsed_field.parse().map_err(|_| "unparsable elapsed field")?;

    let rest = rest.strip_prefix("ms*/").ok_or("missing trailer")?;
    let body = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .ok_or("missing header newline")?;

    Ok((relative_path.to_string(), last_modified, elapsed_ms, body.to_string()))
}

fn parse_timestamp(field: &str) -> Option<SystemTime> {
    let (date_part, frac_part) = field.split_once('.')?;
    if frac_part.len() != 7 || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let naive_date_time = chrono::NaiveDateTime::parse_from_str(date_part, "%Y-%m-%d %H:%M:%S").ok()?;
    let ticks: u32 = frac_part.parse().ok()?;
    let nanos = ticks.checked_mul(100)?;
    let with_nanos = naive_date_time.date().and_hms_nano_opt(
        naive_date_time.hour(),
        naive_date_time.minute(),
        naive_date_time.second(),
        nanos,
    )?;
    Some(Utc.from_utc_datetime(&with_nanos).into())
}

fn is_fresh(entry: &CacheEntry, freshness_timestamp: SystemTime) -> bool {
    entry.last_modified >= freshness_timestamp
}

/// Composes cache layers per spec §4.K's state machine: query layers
/// in order; the first fresh hit up-fills every layer ahead of it;
/// a stale hit evicts that layer and falls through; exhausting every
/// layer regenerates and populates all of them.
pub struct LayeredCache {
    layers: Vec<Box<dyn CacheLayer>>,
    freshness: FreshnessRetriever,
    watched_extensions: Vec<String>,
}

impl LayeredCache {
    pub fn new(layers: Vec<Box<dyn CacheLayer>>, freshness: FreshnessRetriever, watched_extensions: Vec<String>) -> Self {
        Self { layers, freshness, watched_extensions }
    }

    /// The freshness timestamp a lookup for `key` would use right now —
    /// exposed so the inbound `process()` contract (spec §6) can answer
    /// a conditional-GET without first running (or even querying) the
    /// cache tiers.
    pub fn freshness_timestamp(&self, key: &str) -> PipelineResult<SystemTime> {
        self.freshness.last_modified(key, &self.watched_extensions)
    }

    /// Returns the cached entry for `key` if fresh, otherwise calls
    /// `regenerate` (expected to run the full pipeline) and caches its
    /// result. The returned entry's `last_modified` always comes from
    /// the freshness retriever, never from `regenerate`'s own notion of
    /// time, so "date the cache by what actually contributed to the
    /// content" holds even when the leaf file reader's mtime lags.
    pub fn get_or_regenerate<F>(&self, key: &str, regenerate: F) -> PipelineResult<CacheEntry>
    where
        F: FnOnce() -> PipelineResult<(String, u32)>,
    {
        let freshness_timestamp = self.freshness.last_modified(key, &self.watched_extensions)?;

        for (i, layer) in self.layers.iter().enumerate() {
            if let Some(entry) = layer.get(key)? {
                if is_fresh(&entry, freshness_timestamp) {
                    for earlier in &self.layers[..i] {
                        if let Err(e) = earlier.put(key, &entry, 0) {
                            log::warn!("cache upfill failed for {key}: {e}");
                        }
                    }
                    log::debug!("cache hit at tier {i} for {key}");
                    return Ok(entry);
                }
                log::debug!("evicting stale tier {i} entry for {key}");
                layer.remove(key)?;
            }
        }

        log::debug!("cache miss for {key}, regenerating");
        let (content, elapsed_ms) = regenerate()?;
        let entry = CacheEntry::new(key, freshness_timestamp, content);
        for layer in &self.layers {
            if let Err(e) = layer.put(key, &entry, elapsed_ms) {
                log::warn!("cache write failed for {key}: {e}");
            }
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn entry(path: &str, secs: u64, content: &str) -> CacheEntry {
        CacheEntry::new(path, SystemTime::UNIX_EPOCH + Duration::from_secs(secs), content)
    }

    #[test]
    fn cache_header_round_trips_through_format_and_parse() {
        let ts = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let header = format_header("a/b/test.css", ts, 42);
        assert!(header.starts_with("/*0000000012:a/b/test.css:"));
        assert!(header.ends_with("00042ms*/"));

        let bytes = format!("{header}\nbody{{color:red}}").into_bytes();
        let (path, parsed_ts, elapsed, body) = parse_cache_file(&bytes).unwrap();
        assert_eq!(path, "a/b/test.css");
        assert_eq!(elapsed, 42);
        assert_eq!(body, "body{color:red}");
        assert_eq!(parsed_ts.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(), 1_700_000_000);
    }

    #[test]
    fn parse_rejects_deviations_from_the_exact_format() {
        assert!(parse_cache_file(b"not a cache file at all").is_err());
        assert!(parse_cache_file(b"/*000000000x:a.css:2024-01-01 00:00:00.0000000:00000ms*/\nbody").is_err());
    }

    #[test]
    fn memory_cache_basic_get_put_remove() {
        let cache = MemoryCache::new();
        assert!(cache.get("a.css").unwrap().is_none());
        cache.put("a.css", &entry("a.css", 10, "x"), 0).unwrap();
        assert_eq!(cache.get("a.css").unwrap().unwrap().content, "x");
        cache.remove("a.css").unwrap();
        assert!(cache.get("a.css").unwrap().is_none());
    }

    #[test]
    fn disk_cache_put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let disk = DiskCache::new(dir.path(), InvalidCacheBehaviour::Delete);
        disk.put("a.css", &entry("a.css", 500, "p{color:red}"), 7).unwrap();
        let got = disk.get("a.css").unwrap().unwrap();
        assert_eq!(got.content, "p{color:red}");
        assert_eq!(got.last_modified.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(), 500);
    }

    #[test]
    fn disk_cache_deletes_corrupt_file_when_policy_is_delete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.css.cache");
        fs::write(&path, b"garbage").unwrap();
        let disk = DiskCache::new(dir.path(), InvalidCacheBehaviour::Delete);
        assert!(disk.get("a.css").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn disk_cache_keeps_corrupt_file_when_policy_is_ignore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.css.cache");
        fs::write(&path, b"garbage").unwrap();
        let disk = DiskCache::new(dir.path(), InvalidCacheBehaviour::Ignore);
        assert!(disk.get("a.css").unwrap().is_none());
        assert!(path.exists());
    }

    #[test]
    fn layered_cache_upfills_memory_from_a_disk_hit() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.css"), "p{color:red}").unwrap();

        let disk = DiskCache::new(dir.path(), InvalidCacheBehaviour::Delete);
        disk.put("a.css", &entry("a.css", 0, "cached"), 0).unwrap();

        let memory = MemoryCache::new();
        let layers: Vec<Box<dyn CacheLayer>> = vec![Box::new(memory), Box::new(disk)];
        let cache = LayeredCache::new(layers, FreshnessRetriever::new(dir.path()), vec!["css".to_string()]);

        let result = cache.get_or_regenerate("a.css", || panic!("must not regenerate on a fresh disk hit")).unwrap();
        assert_eq!(result.content, "cached");

        // Second call must now hit memory (up-filled by the first call).
        let result2 = cache.get_or_regenerate("a.css", || panic!("must not regenerate")).unwrap();
        assert_eq!(result2.content, "cached");
    }

    #[test]
    fn layered_cache_regenerates_on_a_cold_miss_and_uses_freshness_timestamp() {
        let dir = TempDir::new().unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(123_456);
        fs::write(dir.path().join("a.css"), "p{color:red}").unwrap();
        filetime_set(&dir.path().join("a.css"), when);

        let memory = MemoryCache::new();
        let disk = DiskCache::new(dir.path(), InvalidCacheBehaviour::Delete);
        let layers: Vec<Box<dyn CacheLayer>> = vec![Box::new(memory), Box::new(disk)];
        let cache = LayeredCache::new(layers, FreshnessRetriever::new(dir.path()), vec!["css".to_string()]);

        let result = cache.get_or_regenerate("a.css", || Ok(("generated".to_string(), 5))).unwrap();
        assert_eq!(result.content, "generated");
        assert_eq!(result.last_modified, when);
    }

    #[test]
    fn layered_cache_evicts_stale_memory_entry_and_falls_through() {
        let dir = TempDir::new().unwrap();
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let newer = SystemTime::UNIX_EPOCH + Duration::from_secs(20);
        fs::write(dir.path().join("a.css"), "p{color:red}").unwrap();
        filetime_set(&dir.path().join("a.css"), newer);

        let memory = MemoryCache::new();
        memory.put("a.css", &entry("a.css", 10, "stale"), 0).unwrap();
        let _ = old;

        let disk = DiskCache::new(dir.path(), InvalidCacheBehaviour::Delete);
        let layers: Vec<Box<dyn CacheLayer>> = vec![Box::new(memory), Box::new(disk)];
        let cache = LayeredCache::new(layers, FreshnessRetriever::new(dir.path()), vec!["css".to_string()]);

        let result = cache.get_or_regenerate("a.css", || Ok(("fresh".to_string(), 1))).unwrap();
        assert_eq!(result.content, "fresh");
    }

    fn filetime_set(path: &std::path::Path, when: SystemTime) {
        let secs = when.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs() as libc::time_t;
        let c_path = std::ffi::CString::new(path.to_str().unwrap()).unwrap();
        let times = [
            libc::timespec { tv_sec: secs, tv_nsec: 0 },
            libc::timespec { tv_sec: secs, tv_nsec: 0 },
        ];
        unsafe {
            libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0);
        }
    }
}
