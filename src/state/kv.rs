use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// A single stored value together with its write metadata.
///
/// `updated` is the Unix timestamp (seconds since epoch) of the last
/// accepted mutation; `version` starts at 0 and is bumped by one each
/// time the value actually changes.
///
/// The serde field names match the snapshot file format, a JSON object
/// mapping each key to `{"Updated": .., "Version": .., "Value": ..}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    #[serde(rename = "Updated")]
    pub updated: i64,

    #[serde(rename = "Version")]
    pub version: u64,

    #[serde(rename = "Value")]
    pub value: String,
}

impl ValueRecord {
    /// Write-if-different update rule: if `new_value` differs from the
    /// current value, replace it, bump the version, and refresh the
    /// timestamp. Returns true if the record was mutated. Writing the
    /// same string again is a no-op all the way down: no timestamp
    /// bump, no version bump.
    fn update(&mut self, new_value: &str) -> bool {
        if new_value != self.value {
            self.updated = Utc::now().timestamp();
            self.version += 1;
            self.value = new_value.to_string();
            return true;
        }
        false
    }
}

/// Basic health information about the store, served at the root path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of keys currently in the store.
    pub size: usize,

    /// Unix timestamp of the last successful snapshot write (0 if the
    /// store was never persisted and no snapshot existed at startup).
    pub last_write: i64,

    /// Unix timestamp of the most recent accepted mutation (0 if none).
    pub last_update: i64,

    /// Description of the last persistence failure, or empty if the
    /// last attempt succeeded.
    pub write_error: String,
}

/// Everything guarded by the store's lock. Metrics live inside the
/// same critical section as the entries they describe, so a reader
/// can never observe a mutation with stale metrics (or vice versa).
#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, ValueRecord>,
    metrics: Metrics,
}

/// The key-value store: a mutex-guarded map from key to [`ValueRecord`],
/// its derived [`Metrics`], and the path of the on-disk JSON snapshot.
///
/// One coarse lock covers reads, writes and metrics. At this scale a
/// reader/writer split buys nothing, and the single section keeps the
/// entries/metrics consistency argument trivial.
#[derive(Debug)]
pub struct Store {
    file_path: PathBuf,
    inner: Mutex<Inner>,
}

/// Shared store handle used across the app.
pub type SharedStore = Arc<Store>;

impl Store {
    /// Create an empty store that will persist to `file_path`.
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Path of the snapshot file this store persists to.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Look up a key, returning a copy of its record if present.
    pub fn get(&self, key: &str) -> Option<ValueRecord> {
        self.inner.lock().unwrap().entries.get(key).cloned()
    }

    /// Set `key` to `value`. Applies the write-if-different rule and
    /// keeps the metrics in step within the same critical section.
    /// Returns true if a mutation occurred; the caller uses this to
    /// decide whether a persist is warranted.
    ///
    /// An absent key gets a fresh version-0 record before the
    /// comparison, but the record is only stored if the update is
    /// accepted. Setting an absent key to the empty string therefore
    /// stores nothing at all.
    pub fn set(&self, key: &str, value: &str) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        match inner.entries.get_mut(key) {
            Some(record) => {
                if !record.update(value) {
                    return false;
                }
            }
            None => {
                let mut record = ValueRecord::default();
                if !record.update(value) {
                    return false;
                }
                inner.entries.insert(key.to_string(), record);
            }
        }

        inner.metrics.last_update = Utc::now().timestamp();
        inner.metrics.size = inner.entries.len();
        true
    }

    /// A consistent copy of the current metrics.
    pub fn metrics(&self) -> Metrics {
        self.inner.lock().unwrap().metrics.clone()
    }

    /// Flush the full entry map to the snapshot file, replacing it via
    /// a temp-file-plus-rename so a reader never sees a partial file.
    ///
    /// On success `last_write` is refreshed and any previous write
    /// error is cleared. On failure the error is recorded in
    /// `write_error` (for the metrics endpoint) and returned;
    /// `last_write` is left alone.
    ///
    /// Runs entirely inside the exclusive section, so concurrent
    /// persists cannot interleave their file writes.
    pub fn persist(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        match write_snapshot(&self.file_path, &inner.entries) {
            Ok(()) => {
                inner.metrics.last_write = Utc::now().timestamp();
                inner.metrics.write_error.clear();
                Ok(())
            }
            Err(e) => {
                inner.metrics.write_error = e.to_string();
                Err(e)
            }
        }
    }

    /// Load the snapshot file into the store, replacing any entries.
    ///
    /// A missing file is not an error; the store simply starts empty.
    /// A file that exists but cannot be decoded is: the caller must
    /// treat that as fatal rather than serve a partial data set.
    pub fn load(&self) -> Result<(), StoreError> {
        let data = match fs::read(&self.file_path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let entries: HashMap<String, ValueRecord> =
            serde_json::from_slice(&data).map_err(|source| StoreError::CorruptSnapshot {
                path: self.file_path.clone(),
                source,
            })?;

        let mut guard = self.inner.lock().unwrap();
        guard.entries = entries;
        tracing::info!("Loaded snapshot: {} entries", guard.entries.len());
        Ok(())
    }

    /// Populate the metrics from the loaded entries and the on-disk
    /// snapshot. Called once after [`Store::load`], before serving.
    ///
    /// `last_update` becomes the latest update time across all loaded
    /// records, and `last_write` the snapshot file's modification time.
    /// A stat failure other than "file not found" is recorded in
    /// `write_error`; an absent file just leaves `last_write` at 0.
    pub fn init_metrics(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        inner.metrics.size = inner.entries.len();
        inner.metrics.last_update = inner
            .entries
            .values()
            .map(|record| record.updated)
            .max()
            .unwrap_or(0);

        match fs::metadata(&self.file_path) {
            Ok(meta) => match meta.modified() {
                Ok(modified) => {
                    inner.metrics.last_write = DateTime::<Utc>::from(modified).timestamp();
                }
                Err(e) => inner.metrics.write_error = e.to_string(),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => inner.metrics.write_error = e.to_string(),
        }
    }
}

/// Serialize the entry map and replace the snapshot file atomically:
/// write a sibling temp file, then rename it over the target.
fn write_snapshot(
    path: &Path,
    entries: &HashMap<String, ValueRecord>,
) -> Result<(), StoreError> {
    let json = serde_json::to_vec(entries).map_err(StoreError::Serialize)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> Store {
        Store::new(dir.path().join("store.json"))
    }

    #[test]
    fn get_missing_key_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        assert!(store.get("nope").is_none());
    }

    #[test]
    fn set_bumps_version_on_each_change() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        assert!(store.set("color", "blue"));
        let first = store.get("color").unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.value, "blue");

        assert!(store.set("color", "red"));
        let second = store.get("color").unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.value, "red");
        assert!(second.updated >= first.updated);
    }

    #[test]
    fn set_same_value_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        assert!(store.set("color", "blue"));
        let before = store.get("color").unwrap();
        let metrics_before = store.metrics();

        assert!(!store.set("color", "blue"));
        let after = store.get("color").unwrap();
        let metrics_after = store.metrics();

        assert_eq!(before, after);
        assert_eq!(metrics_before.last_update, metrics_after.last_update);
        assert_eq!(metrics_before.size, metrics_after.size);
    }

    #[test]
    fn empty_value_on_an_absent_key_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        // The fresh record starts as the empty string, so this is a
        // no-op and must not leave a phantom entry behind.
        assert!(!store.set("ghost", ""));
        assert!(store.get("ghost").is_none());

        let metrics = store.metrics();
        assert_eq!(metrics.size, 0);
        assert_eq!(metrics.last_update, 0);
    }

    #[test]
    fn set_keeps_metrics_in_step() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.set("a", "1");
        store.set("b", "2");

        let metrics = store.metrics();
        assert_eq!(metrics.size, 2);
        assert!(metrics.last_update > 0);
        assert_eq!(metrics.last_write, 0);
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let store = Store::new(&path);
        store.set("color", "blue");
        store.set("shape", "circle");
        store.persist().unwrap();

        let reloaded = Store::new(&path);
        reloaded.load().unwrap();

        assert_eq!(store.get("color"), reloaded.get("color"));
        assert_eq!(store.get("shape"), reloaded.get("shape"));
        assert!(reloaded.get("missing").is_none());
    }

    #[test]
    fn persist_updates_write_metrics() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.set("color", "blue");
        store.persist().unwrap();

        let metrics = store.metrics();
        assert!(metrics.last_write > 0);
        assert!(metrics.write_error.is_empty());
    }

    #[test]
    fn persist_failure_is_recorded_not_swallowed() {
        let dir = TempDir::new().unwrap();
        // A target inside a directory that doesn't exist.
        let store = Store::new(dir.path().join("no-such-dir").join("store.json"));

        store.set("color", "blue");
        assert!(store.persist().is_err());

        let metrics = store.metrics();
        assert!(!metrics.write_error.is_empty());
        assert_eq!(metrics.last_write, 0);
    }

    #[test]
    fn load_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.load().unwrap();
        assert_eq!(store.metrics().size, 0);
    }

    #[test]
    fn load_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"definitely not json").unwrap();

        let store = Store::new(&path);
        assert!(matches!(
            store.load(),
            Err(StoreError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn init_metrics_reflects_loaded_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let store = Store::new(&path);
        store.set("color", "blue");
        store.set("shape", "circle");
        store.persist().unwrap();
        let latest = store
            .get("color")
            .unwrap()
            .updated
            .max(store.get("shape").unwrap().updated);

        let reloaded = Store::new(&path);
        reloaded.load().unwrap();
        reloaded.init_metrics();

        let metrics = reloaded.metrics();
        assert_eq!(metrics.size, 2);
        assert_eq!(metrics.last_update, latest);
        assert!(metrics.last_write > 0);
        assert!(metrics.write_error.is_empty());
    }

    #[test]
    fn init_metrics_with_no_snapshot_leaves_zeroes() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.load().unwrap();
        store.init_metrics();

        let metrics = store.metrics();
        assert_eq!(metrics.size, 0);
        assert_eq!(metrics.last_update, 0);
        assert_eq!(metrics.last_write, 0);
        assert!(metrics.write_error.is_empty());
    }

    #[test]
    fn concurrent_sets_on_disjoint_keys_all_land() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(test_store(&dir));

        const N: usize = 8;
        let handles: Vec<_> = (0..N)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    assert!(store.set(&format!("key-{i}"), "value"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.metrics().size, N);
        for i in 0..N {
            let record = store.get(&format!("key-{i}")).unwrap();
            assert_eq!(record.version, 1);
        }
    }

    #[test]
    fn snapshot_uses_the_documented_field_names() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.set("color", "blue");
        store.persist().unwrap();

        let raw = fs::read_to_string(store.file_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &json["color"];
        assert_eq!(entry["Value"], "blue");
        assert_eq!(entry["Version"], 1);
        assert!(entry["Updated"].as_i64().unwrap() > 0);
    }
}
