use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// Durable per-key store for raw upstream payloads.
///
/// `get` never fails: unreadable entries are misses. A stored `null` payload is a hit.
pub trait PayloadCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedPayload>;
    fn set(&self, key: &str, payload: &Value) -> AppResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPayload {
    pub fetched_at: DateTime<Utc>,
    pub payload: Value,
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    dir: PathBuf,
}

impl JsonFileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl PayloadCache for JsonFileCache {
    fn get(&self, key: &str) -> Option<CachedPayload> {
        let path = self.entry_path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(target: "payload_cache", path = %path.display(), ?err, "unreadable cache entry; treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<CachedPayload>(&contents) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(target: "payload_cache", path = %path.display(), ?err, "corrupt cache entry; treating as miss");
                None
            }
        }
    }

    fn set(&self, key: &str, payload: &Value) -> AppResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(key);
        let entry = CachedPayload {
            fetched_at: Utc::now(),
            payload: payload.clone(),
        };
        let serialized = serde_json::to_vec(&entry)?;

        // rename keeps readers from ever seeing a partial file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            AppError::Io(err)
        })
    }
}

fn sanitize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_and_corrupt_entries_are_misses() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("cache"));
        assert!(cache.get("tt0000001").is_none());

        fs::create_dir_all(cache.dir()).unwrap();
        fs::write(cache.entry_path("tt0000001"), b"{\"payload\": [tru").unwrap();
        assert!(cache.get("tt0000001").is_none());

        // a bare payload without the envelope is not a usable entry either
        fs::write(cache.entry_path("tt0000001"), b"[\"Paris\"]").unwrap();
        assert!(cache.get("tt0000001").is_none());
    }

    #[test]
    fn stores_null_payloads_as_hits() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path());
        cache.set("tt0000002", &Value::Null).unwrap();
        let entry = cache.get("tt0000002").expect("cached null");
        assert_eq!(entry.payload, Value::Null);
    }

    #[test]
    fn overwrites_on_refresh() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path());
        cache.set("tt0000003", &json!(["Rome"])).unwrap();
        cache.set("tt0000003", &json!({"locations": ["Oslo"]})).unwrap();
        let entry = cache.get("tt0000003").unwrap();
        assert_eq!(entry.payload, json!({"locations": ["Oslo"]}));
        assert!(!cache.entry_path("tt0000003").with_extension("json.tmp").exists());
    }

    #[test]
    fn sanitizes_path_separators() {
        let cache = JsonFileCache::new("/tmp/cache");
        let path = cache.entry_path("../tt1/evil\\x");
        assert_eq!(path.file_name().unwrap().to_string_lossy(), ".._tt1_evil_x.json");
        assert_eq!(path.parent().unwrap(), Path::new("/tmp/cache"));
    }
}
