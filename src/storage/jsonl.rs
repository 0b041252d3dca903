//! JSONL-based storage implementation with in-memory caching.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Serialize, de::DeserializeOwned};

use super::traits::{Filter, HasId, Storage};
use crate::error::{DoeError, Result};
use crate::id::temp_suffix;

/// JSONL-based storage with in-memory caching.
///
/// The file is the source of truth. Read-modify-write operations re-read it
/// under the collection lock so edits made by another process are not lost.
pub struct JsonlStorage {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl std::fmt::Debug for JsonlStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlStorage")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

fn lock_err<E: std::fmt::Display>(e: E) -> DoeError {
    DoeError::Storage(e.to_string())
}

impl JsonlStorage {
    /// Create a new JsonlStorage at the given path.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the file path for a collection.
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    fn read_file(path: &Path) -> Result<Vec<serde_json::Value>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(serde_json::from_str(&line)?);
            }
        }
        Ok(records)
    }

    /// Load a collection into cache if not already loaded.
    fn ensure_loaded(&self, collection: &str) -> Result<()> {
        {
            let cache = self.cache.read().map_err(lock_err)?;
            if cache.contains_key(collection) {
                return Ok(());
            }
        }

        let mut cache = self.cache.write().map_err(lock_err)?;
        if cache.contains_key(collection) {
            return Ok(());
        }
        let records = Self::read_file(&self.collection_path(collection))?;
        cache.insert(collection.to_string(), records);
        Ok(())
    }

    /// Drop the cached copy so the next read sees the file as it is now.
    pub fn reload(&self, collection: &str) -> Result<()> {
        let records = Self::read_file(&self.collection_path(collection))?;
        self.cache
            .write()
            .map_err(lock_err)?
            .insert(collection.to_string(), records);
        Ok(())
    }

    /// Append a record to the JSONL file.
    fn append_to_file(&self, collection: &str, record: &serde_json::Value) -> Result<()> {
        let path = self.collection_path(collection);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Rewrite the entire collection file, via a temp file and rename.
    fn rewrite_file(&self, collection: &str, records: &[serde_json::Value]) -> Result<()> {
        let path = self.collection_path(collection);
        let tmp = path.with_extension(format!("jsonl.{}", temp_suffix()));
        {
            let mut file = File::create(&tmp)?;
            for record in records {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Append a record without identity checks.
    ///
    /// Intended for logs (events, archives) that are written far more often
    /// than read; the collection is not loaded into cache for this.
    pub fn append<T: Serialize>(&self, collection: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let mut cache = self.cache.write().map_err(lock_err)?;
        self.append_to_file(collection, &value)?;
        if let Some(records) = cache.get_mut(collection) {
            records.push(value);
        }
        Ok(())
    }

    /// Read a collection straight from disk, bypassing the cache.
    pub fn read_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        Self::read_file(&self.collection_path(collection))?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(DoeError::from))
            .collect()
    }
}

fn record_id(record: &serde_json::Value) -> Option<&str> {
    record.get("id").and_then(|v| v.as_str())
}

impl Storage for JsonlStorage {
    fn create<T: Serialize + HasId>(&self, collection: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;
        let value = serde_json::to_value(record)?;

        let mut cache = self.cache.write().map_err(lock_err)?;
        let records = cache
            .get_mut(collection)
            .ok_or_else(|| DoeError::Storage(format!("Collection not loaded: {}", collection)))?;
        if records.iter().any(|r| record_id(r) == Some(record.id())) {
            return Err(DoeError::AlreadyExists(record.id().to_string()));
        }

        // File first, it is the source of truth
        self.append_to_file(collection, &value)?;
        records.push(value);
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        self.ensure_loaded(collection)?;

        let cache = self.cache.read().map_err(lock_err)?;
        let records = cache
            .get(collection)
            .ok_or_else(|| DoeError::Storage(format!("Collection not loaded: {}", collection)))?;

        records
            .iter()
            .find(|r| record_id(r) == Some(id))
            .map(|r| serde_json::from_value(r.clone()).map_err(DoeError::from))
            .transpose()
    }

    fn modify<T, F>(&self, collection: &str, id: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<()>,
    {
        let mut cache = self.cache.write().map_err(lock_err)?;
        let mut records = Self::read_file(&self.collection_path(collection))?;

        let index = records
            .iter()
            .position(|r| record_id(r) == Some(id))
            .ok_or_else(|| DoeError::NotFound(id.to_string()))?;

        let mut record: T = serde_json::from_value(records[index].clone())?;
        f(&mut record)?;
        records[index] = serde_json::to_value(&record)?;

        self.rewrite_file(collection, &records)?;
        cache.insert(collection.to_string(), records);
        Ok(record)
    }

    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>> {
        self.ensure_loaded(collection)?;

        let cache = self.cache.read().map_err(lock_err)?;
        let records = cache
            .get(collection)
            .ok_or_else(|| DoeError::Storage(format!("Collection not loaded: {}", collection)))?;

        records
            .iter()
            .filter(|record| filters.iter().all(|f| f.matches(record)))
            .map(|record| serde_json::from_value(record.clone()).map_err(DoeError::from))
            .collect()
    }

    fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.query(collection, &[])
    }
}
