use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by [`LocalStorage`] implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode or decode `{key}`: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
}

/// An asynchronous key-value store for persisted state.
///
/// Values are JSON trees; [`LocalStorageExt`] adds typed access.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// The stored value, or `fallback` if the key is missing.
    async fn get(&self, key: &str, fallback: Value) -> Result<Value, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every stored key.
    async fn clear(&self) -> Result<(), StorageError>;

    async fn has_key(&self, key: &str) -> Result<bool, StorageError>;

    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Typed helpers over [`LocalStorage`].
#[async_trait]
pub trait LocalStorageExt: LocalStorage {
    async fn set_item<T: Serialize + Sync>(&self, key: &str, item: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(item).map_err(|source| StorageError::Json {
            key: key.to_string(),
            source,
        })?;
        self.set(key, value).await
    }

    /// The stored item, or `fallback` if the key is missing.
    async fn get_item<T: DeserializeOwned + Send>(&self, key: &str, fallback: T) -> Result<T, StorageError> {
        match self.get(key, Value::Null).await? {
            Value::Null => Ok(fallback),
            value => serde_json::from_value(value).map_err(|source| StorageError::Json {
                key: key.to_string(),
                source,
            }),
        }
    }
}

impl<L: LocalStorage + ?Sized> LocalStorageExt for L {}

/// In-process storage; contents live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl LocalStorage for MemoryStorage {
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.items.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str, fallback: Value) -> Result<Value, StorageError> {
        Ok(self.items.read().get(key).cloned().unwrap_or(fallback))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.items.write().clear();
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.items.read().contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.items.read().keys().cloned().collect())
    }
}

const FILE_EXTENSION: &str = "json";

/// Storage backed by a directory with one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir`, creating it on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.{FILE_EXTENSION}")))
    }

    fn io(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl LocalStorage for FileStorage {
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let bytes = serde_json::to_vec_pretty(&value).map_err(|source| StorageError::Json {
            key: key.to_string(),
            source,
        })?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(Self::io(key))?;
        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(Self::io(key))?;
        tokio::fs::rename(&tmp, &path).await.map_err(Self::io(key))
    }

    async fn get(&self, key: &str, fallback: Value) -> Result<Value, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Json {
                key: key.to_string(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(fallback),
            Err(err) => Err(Self::io(key)(err)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io(key)(err)),
        }
    }

    async fn clear(&self) -> Result<(), StorageError> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path).await.map_err(Self::io(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::io("*")(err)),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Self::io("*"))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
