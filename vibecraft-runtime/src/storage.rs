//! # Key-value storage
//!
//! Persistent JSON key-value storage. The step journal and the quota
//! limiter keep their records here, each in its own namespace.

use crate::error::{self, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Storage backend trait
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()>;
    fn delete(&mut self, key: &str) -> Result<()>;
    fn keys(&self) -> Vec<String>;
}

/// In-memory storage (volatile, but useful for testing)
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: HashMap<String, serde_json::Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}

/// File-based storage: one JSON document per key
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)
            .map_err(|e| error::io_error(format!("Failed to create storage dir: {}", e)))?;
        Ok(Self { base_path })
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", encode_key(key)))
    }
}

/// Keys may contain ':' and '/' (namespaces, step names); file names may not.
/// Percent-encoding keeps the mapping reversible so `keys()` can list them.
fn encode_key(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}

fn decode_key(name: &str) -> Option<String> {
    urlencoding::decode(name).ok().map(|k| k.into_owned())
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.key_to_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(error::io_error(format!("Failed to read {}: {}", path.display(), e)))
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| error::serialization_error(format!("{}: {}", path.display(), e)))
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        let path = self.key_to_path(key);
        let content = serde_json::to_string_pretty(&value)
            .map_err(|e| error::serialization_error(e.to_string()))?;
        // write-then-rename so a crash never leaves a half-written record
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| error::io_error(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.key_to_path(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| error::io_error(format!("Failed to delete {}: {}", path.display(), e)))?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        std::fs::read_dir(&self.base_path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let path = e.path();
                        if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                            path.file_stem().and_then(|s| s.to_str()).and_then(decode_key)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// High-level storage interface over a backend, scoped to a namespace
pub struct Storage {
    backend: Box<dyn StorageBackend>,
    namespace: Option<String>,
}

impl Storage {
    pub fn memory() -> Self {
        Self::with_backend(MemoryStorage::new())
    }

    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_backend(FileStorage::new(path)?))
    }

    pub fn with_backend(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            namespace: None,
        }
    }

    /// Set namespace for all operations
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn full_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.backend.get(&self.full_key(key))
    }

    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| error::serialization_error(e.to_string()).with_context("key", key)),
            None => Ok(None),
        }
    }

    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        let full_key = self.full_key(key);
        self.backend.set(&full_key, value)
    }

    pub fn set_typed<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_value(value)
            .map_err(|e| error::serialization_error(e.to_string()).with_context("key", key))?;
        self.set(key, json)
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);
        self.backend.delete(&full_key)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Keys in this namespace, with the namespace prefix stripped
    pub fn keys(&self) -> Vec<String> {
        let prefix = self.namespace.as_ref().map(|ns| format!("{}:", ns));
        self.backend
            .keys()
            .into_iter()
            .filter_map(|k| match &prefix {
                Some(p) => k.strip_prefix(p.as_str()).map(|s| s.to_string()),
                None => Some(k),
            })
            .collect()
    }
}
