//! File-backed storage.
//!
//! Each collection is one JSON document (`<dir>/<collection>.json`) holding a
//! key-ordered map. Every mutation rewrites the document to a temp file and
//! renames it into place, so an interrupted write leaves the previous
//! version intact.

use crate::backend::{KeyRange, QuotaEstimate, StorageBackend};
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

type Collection = BTreeMap<String, Value>;

/// JSON-document-per-collection backend.
pub struct FileBackend {
    dir: PathBuf,
    quota: Option<u64>,
    /// Loaded collections.
    cache: Mutex<HashMap<String, Collection>>,
}

impl FileBackend {
    /// Open (creating if needed) a backend rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Opened file storage backend");

        Ok(Self {
            dir,
            quota: None,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Limit total on-disk size.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota = Some(quota_bytes);
        self
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    fn load(&self, collection: &str) -> StoreResult<Collection> {
        let path = self.path_for(collection);
        match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Ok(Collection::new()),
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => Ok(map),
                Err(e) => {
                    // A corrupt document must not block the layer; start empty.
                    warn!(path = %path.display(), error = %e, "Corrupt collection file, starting empty");
                    Ok(Collection::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Collection::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn with_collection<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> R,
    ) -> StoreResult<R> {
        let mut cache = self.cache.lock();
        if !cache.contains_key(collection) {
            let loaded = self.load(collection)?;
            cache.insert(collection.to_string(), loaded);
        }
        let entry = cache
            .get_mut(collection)
            .ok_or_else(|| StoreError::Unavailable(format!("collection {collection} not loaded")))?;
        Ok(f(entry))
    }

    /// Bytes currently used by all collection documents.
    fn disk_usage(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    fn file_len(&self, collection: &str) -> u64 {
        fs::metadata(self.path_for(collection))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn persist(&self, collection: &str, map: &Collection) -> StoreResult<()> {
        let bytes = serde_json::to_vec(map)?;

        if let Some(quota) = self.quota {
            let others = self.disk_usage().saturating_sub(self.file_len(collection));
            let needed = bytes.len() as u64;
            if others + needed > quota {
                return Err(StoreError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(others),
                });
            }
        }

        let path = self.path_for(collection);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(collection, bytes = bytes.len(), "Persisted collection");
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Value>> {
        self.with_collection(collection, |c| c.get(key).cloned())
    }

    fn put(&self, collection: &str, key: &str, value: Value) -> StoreResult<()> {
        let mut cache = self.cache.lock();
        let mut next = match cache.get(collection) {
            Some(existing) => existing.clone(),
            None => self.load(collection)?,
        };
        next.insert(key.to_string(), value);

        // Only commit to the in-memory view once the file write succeeded.
        self.persist(collection, &next)?;
        cache.insert(collection.to_string(), next);
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StoreResult<bool> {
        let mut cache = self.cache.lock();
        let mut next = match cache.get(collection) {
            Some(existing) => existing.clone(),
            None => self.load(collection)?,
        };
        if next.remove(key).is_none() {
            return Ok(false);
        }

        self.persist(collection, &next)?;
        cache.insert(collection.to_string(), next);
        Ok(true)
    }

    fn range_scan(&self, collection: &str, range: KeyRange) -> StoreResult<Vec<(String, Value)>> {
        self.with_collection(collection, |c| {
            c.iter()
                .filter(|(k, _)| range.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    fn estimate_quota(&self) -> Option<QuotaEstimate> {
        let quota = self.quota?;
        Some(QuotaEstimate {
            usage: self.disk_usage(),
            quota,
        })
    }
}
