//! Launchpad storage layer
//!
//! Features:
//! - Async storage trait (`Storage`) using `async-trait`.
//! - In-memory backend (`MemStorage`) on top of `tokio::sync::RwLock`.
//! - Filesystem backend (`FsStorage`): one file per key and generation, sharded
//!   by SHA-256, atomic writes via temp file + rename, bincode key index.
//!   A batch commits when its index replaces the previous one.
//! - Batches (`Batch`) applied under a single backend lock.
//! - `DirLock`: exclusive advisory lock on a data directory across processes.
//! - Typed facade (`TypedStorage`) using `serde` + `bincode`.
//! - `FactoryStore`: factory state laid out over any backend.

use std::{
    collections::BTreeMap,
    fmt::{Debug, Formatter},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

mod factory_store;
mod lock;

pub use factory_store::{FactoryStore, StoredToken};
pub use lock::DirLock;

const INDEX_FILE: &str = "_index.bin";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-key bookkeeping kept in the index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Last write time (ms since epoch).
    pub written_ms: u64,
    /// Stored value length in bytes.
    pub len: u64,
    /// Generation of the data file holding the value.
    pub generation: u64,
}

impl Meta {
    fn new(len: usize, generation: u64) -> Self {
        Self { written_ms: now_ms(), len: len as u64, generation }
    }
}

#[derive(Clone, Debug)]
pub enum BatchItem {
    Put { key: Vec<u8>, value: Bytes },
    Delete { key: Vec<u8> },
}

/// A write batch.
#[derive(Default, Debug)]
pub struct Batch {
    items: Vec<BatchItem>,
}

impl Batch {
    pub fn put(mut self, key: impl Into<Vec<u8>>, value: impl Into<Bytes>) -> Self {
        self.items.push(BatchItem::Put { key: key.into(), value: value.into() });
        self
    }

    pub fn delete(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.items.push(BatchItem::Delete { key: key.into() });
        self
    }

    /// Serialize `value` with bincode and queue it.
    pub fn put_typed<T: Serialize>(self, key: impl Into<Vec<u8>>, value: &T) -> Result<Self, StorageError> {
        let bytes = bincode::serialize(value)?;
        Ok(self.put(key, bytes))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found")]
    NotFound,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde: {0}")]
    Serde(#[from] Box<bincode::ErrorKind>),
    #[error("corrupt store: {0}")]
    Corrupt(String),
    #[error("data dir is locked by another process: {}", .0.display())]
    Locked(PathBuf),
    #[error("other: {0}")]
    Other(String),
}

/// Unified async storage trait.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn put(&self, key: &[u8], value: Bytes) -> Result<(), StorageError>;
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StorageError>;
    /// Delete a key (no error if missing).
    async fn delete(&self, key: &[u8]) -> Result<(), StorageError>;
    async fn exists(&self, key: &[u8]) -> Result<bool, StorageError>;
    /// Keys starting with `prefix`, ascending.
    async fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StorageError>;
    /// Apply a write batch under the backend lock.
    async fn write_batch(&self, batch: Batch) -> Result<(), StorageError>;
    async fn flush(&self) -> Result<(), StorageError>;
}

/// Typed facade over any `Storage`: values go through bincode.
pub struct TypedStorage<S: Storage> {
    inner: S,
}

impl<S: Storage> TypedStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn put<T: Serialize + Send + Sync>(&self, key: &[u8], value: &T) -> Result<(), StorageError> {
        let bytes = bincode::serialize(value)?;
        self.inner.put(key, Bytes::from(bytes)).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StorageError> {
        match self.inner.get(key).await? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    pub async fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    pub async fn write_batch(&self, batch: Batch) -> Result<(), StorageError> {
        self.inner.write_batch(batch).await
    }
}

// ============================ In-memory backend ===============================

#[derive(Clone, Default)]
pub struct MemStorage {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
}

impl Debug for MemStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStorage").finish()
    }
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn put(&self, key: &[u8], value: Bytes) -> Result<(), StorageError> {
        self.inner.write().await.insert(key.to_vec(), value);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.inner.read().await.contains_key(key))
    }

    async fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        let m = self.inner.read().await;
        Ok(m.range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn write_batch(&self, batch: Batch) -> Result<(), StorageError> {
        let mut m = self.inner.write().await;
        for item in batch.items {
            match item {
                BatchItem::Put { key, value } => {
                    m.insert(key, value);
                }
                BatchItem::Delete { key } => {
                    m.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ============================ Filesystem backend ==============================

/// On-disk index: every live key and the generation its data file belongs to.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Index {
    /// Last committed generation.
    generation: u64,
    entries: BTreeMap<Vec<u8>, Meta>,
}

#[derive(Clone)]
pub struct FsStorage {
    root: PathBuf,
    index: Arc<RwLock<Index>>,
}

impl Debug for FsStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStorage").field("root", &self.root).finish()
    }
}

impl FsStorage {
    /// Create or open storage at `root`. Loads the index if present.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let index_path = root.join(INDEX_FILE);
        let index = if tokio::fs::try_exists(&index_path).await? {
            let data = tokio::fs::read(&index_path).await?;
            bincode::deserialize::<Index>(&data)?
        } else {
            Index::default()
        };
        debug!(
            root = %root.display(),
            keys = index.entries.len(),
            generation = index.generation,
            "fs storage opened"
        );
        Ok(Self { root, index: Arc::new(RwLock::new(index)) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Last committed generation.
    pub async fn generation(&self) -> u64 {
        self.index.read().await.generation
    }

    /// Key + generation -> root/aa/bb/cc/<sha256>.<generation>.dat
    fn path_for(root: &Path, key: &[u8], generation: u64) -> PathBuf {
        let hex = hex::encode(Sha256::digest(key));
        root.join(&hex[0..2])
            .join(&hex[2..4])
            .join(&hex[4..6])
            .join(format!("{hex}.{generation:016x}.dat"))
    }

    async fn persist_index(&self, idx: &Index) -> Result<(), StorageError> {
        let bytes = bincode::serialize(idx)?;
        Self::write_file_atomic(&self.root.join(INDEX_FILE), &bytes).await
    }

    async fn write_file_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir).await?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        let tmp_path = tmp.into_temp_path();
        tokio::fs::rename(&*tmp_path, path).await?;
        trace!(path = %path.display(), bytes = data.len(), "file written");
        Ok(())
    }

    async fn remove_file(path: &Path) -> Result<(), StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `items` as one generation.
    ///
    /// New values land in files of the next generation, which only the new index
    /// references. The index rename is the commit point: until it happens the
    /// previous index and every file it names are untouched. Superseded files
    /// are removed after the commit.
    async fn commit(&self, items: Vec<BatchItem>) -> Result<(), StorageError> {
        let mut idx = self.index.write().await;
        let generation = idx.generation + 1;
        let mut next = idx.clone();
        next.generation = generation;

        let mut written: Vec<PathBuf> = Vec::new();
        let mut superseded: Vec<(Vec<u8>, u64)> = Vec::new();
        let staged: Result<(), StorageError> = async {
            for item in &items {
                match item {
                    BatchItem::Put { key, value } => {
                        let path = Self::path_for(&self.root, key, generation);
                        Self::write_file_atomic(&path, value).await?;
                        written.push(path);
                        if let Some(old) = next.entries.insert(key.clone(), Meta::new(value.len(), generation)) {
                            superseded.push((key.clone(), old.generation));
                        }
                    }
                    BatchItem::Delete { key } => {
                        if let Some(old) = next.entries.remove(key) {
                            superseded.push((key.clone(), old.generation));
                        }
                    }
                }
            }
            self.persist_index(&next).await
        }
        .await;

        if let Err(e) = staged {
            for path in &written {
                if let Err(rm) = Self::remove_file(path).await {
                    warn!(path = %path.display(), error = %rm, "stale data file left behind");
                }
            }
            return Err(e);
        }
        *idx = next;

        superseded.retain(|(key, g)| idx.entries.get(key).map(|m| m.generation) != Some(*g));
        for (key, g) in &superseded {
            let path = Self::path_for(&self.root, key, *g);
            if let Err(e) = Self::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "superseded data file left behind");
            }
        }
        debug!(items = items.len(), generation, "batch committed");
        Ok(())
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn put(&self, key: &[u8], value: Bytes) -> Result<(), StorageError> {
        self.commit(vec![BatchItem::Put { key: key.to_vec(), value }]).await
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
        let idx = self.index.read().await;
        let Some(meta) = idx.entries.get(key) else {
            return Ok(None);
        };
        match tokio::fs::read(Self::path_for(&self.root, key, meta.generation)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::Corrupt(format!(
                "indexed key {} has no data file",
                hex::encode(key)
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        if !self.exists(key).await? {
            return Ok(());
        }
        self.commit(vec![BatchItem::Delete { key: key.to_vec() }]).await
    }

    async fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.index.read().await.entries.contains_key(key))
    }

    async fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        let idx = self.index.read().await;
        Ok(idx
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn write_batch(&self, batch: Batch) -> Result<(), StorageError> {
        self.commit(batch.items).await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let idx = self.index.read().await;
        self.persist_index(&idx).await
    }
}

// ================================ Tests ======================================
