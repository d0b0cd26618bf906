//! A disk-backed key-value cache for app-level snapshots (room lists,
//! profile blobs, preview payloads) with a fixed time-to-live.
//!
//! Reads fail closed: a missing file, an expired record, or a record that no
//! longer parses all behave as a cache miss. Staleness is preferable to
//! surfacing corrupt or outdated snapshots as fresh.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Records older than this are treated as absent on read.
pub const CACHE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Bump this when the on-disk record layout changes; mismatched metadata
/// invalidates nothing by itself, but readers may use it to wipe stale trees.
pub const SCHEMA_VERSION: &str = "1";

const METADATA_FILE_NAME: &str = "cache_metadata.json";

/// One cached payload with its write timestamp.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    written_at_ms: u64,
    payload: Value,
}

/// Sidecar metadata for the whole cache tree.
#[derive(Debug, Serialize, Deserialize)]
struct CacheMetadata {
    last_update_ms: u64,
    schema_version: String,
}

/// A TTL-bounded key-value store rooted at one directory.
///
/// Keys are slash-separated namespace paths (`"rooms/summary"`,
/// `"profile/@me:example.org"`); each component is sanitized into a
/// filesystem-safe name.
pub struct LocalCacheStore {
    root: PathBuf,
}

impl LocalCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Retrieves the payload stored under `key`, or `None` if it is missing,
    /// older than [`CACHE_TTL_MS`], or unreadable.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, now_ms())
    }

    fn get_at(&self, key: &str, now_ms: u64) -> Option<Value> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("failed to read cache record {}: {e}", path.display());
                return None;
            }
        };
        let record: CacheRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("discarding unparseable cache record {}: {e}", path.display());
                return None;
            }
        };
        let age_ms = now_ms.saturating_sub(record.written_at_ms);
        if age_ms >= CACHE_TTL_MS {
            debug!("cache record {key:?} expired ({age_ms} ms old)");
            return None;
        }
        Some(record.payload)
    }

    /// Writes `payload` under `key`, stamping it with the current time, and
    /// refreshes the tree's metadata sidecar.
    pub fn set(&self, key: &str, payload: &Value) -> anyhow::Result<()> {
        self.set_at(key, payload, now_ms())
    }

    fn set_at(&self, key: &str, payload: &Value, now_ms: u64) -> anyhow::Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("couldn't create cache dir {}", parent.display()))?;
        }
        let record = CacheRecord { written_at_ms: now_ms, payload: payload.clone() };
        std::fs::write(&path, serde_json::to_vec(&record)?)
            .with_context(|| format!("couldn't write cache record {}", path.display()))?;
        self.write_metadata(now_ms)?;
        Ok(())
    }

    /// Removes every record whose key starts with the given namespace
    /// component. Missing namespaces are not an error.
    pub fn clear_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        let dir = self.root.join(sanitize_filename::sanitize(namespace));
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("couldn't clear cache namespace {}", dir.display())
            }),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        let mut components = key.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            let name = sanitize_filename::sanitize(component);
            if components.peek().is_none() {
                // Append rather than `set_extension`, which would clobber a
                // dot-suffix inside the key component itself.
                path.push(format!("{name}.json"));
            } else {
                path.push(name);
            }
        }
        path
    }

    fn write_metadata(&self, now_ms: u64) -> anyhow::Result<()> {
        let metadata = CacheMetadata {
            last_update_ms: now_ms,
            schema_version: SCHEMA_VERSION.to_owned(),
        };
        let path = self.root.join(METADATA_FILE_NAME);
        std::fs::write(&path, serde_json::to_vec(&metadata)?)
            .with_context(|| format!("couldn't write cache metadata {}", path.display()))?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, LocalCacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCacheStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn set_then_get_returns_the_payload() {
        let (_dir, store) = store();
        let payload = json!({ "rooms": ["!a:example.org"] });
        store.set("rooms/summary", &payload).unwrap();
        assert_eq!(store.get("rooms/summary"), Some(payload));
    }

    #[test]
    fn missing_key_is_a_miss() {
        let (_dir, store) = store();
        assert_eq!(store.get("rooms/summary"), None);
    }

    #[test]
    fn records_expire_exactly_at_the_ttl_boundary() {
        let (_dir, store) = store();
        let payload = json!("snapshot");
        let t0 = 1_700_000_000_000u64;
        store.set_at("profile/@me:example.org", &payload, t0).unwrap();

        // Just inside the window: still retrievable.
        assert_eq!(
            store.get_at("profile/@me:example.org", t0 + CACHE_TTL_MS - 1),
            Some(payload),
        );
        // At and past the window: a miss.
        assert_eq!(store.get_at("profile/@me:example.org", t0 + CACHE_TTL_MS), None);
        assert_eq!(store.get_at("profile/@me:example.org", t0 + CACHE_TTL_MS + 1), None);
    }

    #[test]
    fn unparseable_records_read_as_misses() {
        let (_dir, store) = store();
        store.set("rooms/summary", &json!(1)).unwrap();
        let path = store.path_for("rooms/summary");
        std::fs::write(&path, b"{ not json").unwrap();
        assert_eq!(store.get("rooms/summary"), None);
    }

    #[test]
    fn clearing_a_namespace_removes_only_its_records() {
        let (_dir, store) = store();
        store.set("rooms/summary", &json!(1)).unwrap();
        store.set("profile/@me:example.org", &json!(2)).unwrap();

        store.clear_namespace("rooms").unwrap();
        assert_eq!(store.get("rooms/summary"), None);
        assert_eq!(store.get("profile/@me:example.org"), Some(json!(2)));

        // Clearing an already-absent namespace is fine.
        store.clear_namespace("rooms").unwrap();
    }

    #[test]
    fn keys_with_hostile_components_stay_inside_the_root() {
        let (_dir, store) = store();
        store.set("../escape/attempt", &json!(true)).unwrap();
        let path = store.path_for("../escape/attempt");
        assert!(path.starts_with(store.root()));
    }
}
