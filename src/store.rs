//! Object store abstraction.
//!
//! The pipeline talks to storage through the blocking [`ObjectStore`] trait.
//! Retry and timeout policy belongs to the concrete client (see
//! [`crate::s3::StoreOptions`]); the pipeline only distinguishes "not found"
//! from every other failure.

use crate::constants::METADATA_SIDECAR_SUFFIX;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadResult {
    Exists,
    NotFound,
}

pub trait ObjectStore: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError>;

    /// Writes `bytes`, replacing any existing object unconditionally.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), StoreError>;

    fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, StoreError>;
}

macro_rules! forward_object_store {
    ($($wrapper:ident),+) => {$(
        impl<T: ObjectStore + ?Sized> ObjectStore for $wrapper<T> {
            fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
                (**self).get(bucket, key)
            }

            fn put(
                &self,
                bucket: &str,
                key: &str,
                bytes: Vec<u8>,
                content_type: &str,
                cache_control: &str,
            ) -> Result<(), StoreError> {
                (**self).put(bucket, key, bytes, content_type, cache_control)
            }

            fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, StoreError> {
                (**self).head(bucket, key)
            }
        }
    )+};
}

forward_object_store!(Arc, Box);

/// In-process store, used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    operations: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: Option<&str>) {
        self.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.map(str::to_string),
                cache_control: None,
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Number of get/put/head calls served so far.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), StoredObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.object(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: Some(content_type.to_string()),
                cache_control: Some(cache_control.to_string()),
            },
        );
        Ok(())
    }

    fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, StoreError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        Ok(if self.object(bucket, key).is_some() {
            HeadResult::Exists
        } else {
            HeadResult::NotFound
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMetadata {
    content_type: Option<String>,
    cache_control: Option<String>,
}

/// Local directory store laid out as `<root>/<bucket>/<key>`.
///
/// Content type and cache control live in a `<key>.meta.json` sidecar.
/// Writes go through a temp file and a rename so readers never observe a
/// partial object.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let valid = |s: &str| {
            !s.is_empty()
                && !s.ends_with(METADATA_SIDECAR_SUFFIX)
                && Path::new(s)
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
        };
        if !valid(bucket) || bucket.contains('/') {
            return Err(StoreError::InvalidKey(bucket.to_string()));
        }
        if !valid(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(bucket).join(key))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(METADATA_SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// Lists keys in `bucket` starting with `prefix`, sorted, sidecars excluded.
    pub fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let bucket_root = self.root.join(bucket);
        if !bucket_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&bucket_root).sort_by_file_name() {
            let entry = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&bucket_root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.ends_with(METADATA_SIDECAR_SUFFIX) || !key.starts_with(prefix) {
                continue;
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

fn not_found_or(err: io::Error, bucket: &str, key: &str) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StoreError::Io(err)
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        let path = self.object_path(bucket, key)?;
        let bytes = fs::read(&path).map_err(|e| not_found_or(e, bucket, key))?;

        let metadata = match fs::read(Self::sidecar_path(&path)) {
            Ok(raw) => serde_json::from_slice::<ObjectMetadata>(&raw)
                .map_err(|e| StoreError::Backend(format!("corrupt metadata for {}: {}", key, e)))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ObjectMetadata {
                content_type: None,
                cache_control: None,
            },
            Err(e) => return Err(StoreError::Io(e)),
        };

        Ok(StoredObject {
            bytes,
            content_type: metadata.content_type,
            cache_control: metadata.cache_control,
        })
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        let metadata = serde_json::to_vec_pretty(&ObjectMetadata {
            content_type: Some(content_type.to_string()),
            cache_control: Some(cache_control.to_string()),
        })
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Self::write_atomic(&path, &bytes)?;
        Self::write_atomic(&Self::sidecar_path(&path), &metadata)?;
        Ok(())
    }

    fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, StoreError> {
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(HeadResult::Exists),
            Ok(_) => Ok(HeadResult::NotFound),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HeadResult::NotFound),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
