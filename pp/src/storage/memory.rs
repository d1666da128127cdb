//! In-process storage
//!
//! A map of identities to byte contents. Every write or delete is announced
//! to watchers immediately. Directories are explicit (`create_dir`) or
//! implied by a stored file below them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ByteStream, CHANGE_CHANNEL_CAPACITY, ResourceStat, Storage, StorageChange, StorageError};
use crate::identity::ContentId;

const DEFAULT_CHUNK_SIZE: usize = 64;

#[derive(Default)]
struct Contents {
    files: HashMap<ContentId, (Vec<u8>, SystemTime)>,
    dirs: HashSet<ContentId>,
}

#[derive(Default)]
struct Inner {
    contents: RwLock<Contents>,
    watchers: Mutex<HashMap<ContentId, broadcast::Sender<StorageChange>>>,
    read_delay: Mutex<Option<Duration>>,
}

/// Cloneable handle to a shared in-memory store
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store content, announcing `Added` or `Updated`
    pub fn write(&self, identity: impl Into<ContentId>, content: impl Into<Vec<u8>>) {
        let identity = identity.into();
        let existed = {
            let mut contents = self.contents_mut();
            contents
                .files
                .insert(identity.clone(), (content.into(), SystemTime::now()))
                .is_some()
        };
        let change = if existed {
            StorageChange::Updated
        } else {
            StorageChange::Added
        };
        debug!(%identity, ?change, "MemoryStorage::write: called");
        self.notify(&identity, change);
    }

    /// Remove content, announcing `Deleted` if it existed
    pub fn delete(&self, identity: impl Into<ContentId>) -> bool {
        let identity = identity.into();
        let existed = self.contents_mut().files.remove(&identity).is_some();
        debug!(%identity, existed, "MemoryStorage::delete: called");
        if existed {
            self.notify(&identity, StorageChange::Deleted);
        }
        existed
    }

    pub fn create_dir(&self, identity: impl Into<ContentId>) {
        self.contents_mut().dirs.insert(identity.into());
    }

    /// Delay applied before each chunk is produced, to keep reads in flight
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        let mut guard = match self.inner.read_delay.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = delay;
    }

    fn read_delay(&self) -> Option<Duration> {
        match self.inner.read_delay.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn contents_mut(&self) -> std::sync::RwLockWriteGuard<'_, Contents> {
        match self.inner.contents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn contents(&self) -> std::sync::RwLockReadGuard<'_, Contents> {
        match self.inner.contents.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, identity: &ContentId, change: StorageChange) {
        let watchers = match self.inner.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = watchers.get(identity) {
            let _ = tx.send(change);
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn resolve(&self, identity: &ContentId) -> Result<ResourceStat, StorageError> {
        debug!(%identity, "MemoryStorage::resolve: called");
        let contents = self.contents();
        if let Some((_, modified)) = contents.files.get(identity) {
            return Ok(ResourceStat::leaf(Some(*modified)));
        }
        let prefix = format!("{}/", identity.as_str().trim_end_matches('/'));
        let implied = contents.files.keys().any(|k| k.as_str().starts_with(&prefix));
        if contents.dirs.contains(identity) || implied {
            return Ok(ResourceStat::container());
        }
        Ok(ResourceStat::missing())
    }

    async fn read_stream(&self, identity: &ContentId) -> Result<ByteStream, StorageError> {
        debug!(%identity, "MemoryStorage::read_stream: called");
        let bytes = match self.contents().files.get(identity) {
            Some((bytes, _)) => bytes.clone(),
            None => return Err(StorageError::NotFound(identity.clone())),
        };
        let delay = self.read_delay();
        let chunks: Vec<Vec<u8>> = bytes.chunks(DEFAULT_CHUNK_SIZE).map(<[u8]>::to_vec).collect();

        let stream = stream::iter(chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, StorageError>(chunk)
        });
        Ok(stream.boxed())
    }

    fn watch(&self, identity: &ContentId) -> broadcast::Receiver<StorageChange> {
        debug!(%identity, "MemoryStorage::watch: called");
        let mut watchers = match self.inner.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        watchers
            .entry(identity.clone())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_round() {
        let storage = MemoryStorage::new();
        let text = "a".repeat(DEFAULT_CHUNK_SIZE * 3 + 1);
        storage.write("/p/a.prompt.md", text.clone());

        let chunks: Vec<_> = storage
            .read_stream(&ContentId::new("/p/a.prompt.md"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 4);
        let bytes: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap()).collect();
        assert_eq!(bytes, text.as_bytes());
    }

    #[tokio::test]
    async fn test_resolve_containers() {
        let storage = MemoryStorage::new();
        storage.write("/p/nested/a.md", "x");
        storage.create_dir("/empty");

        let stat = storage.resolve(&ContentId::new("/p/nested")).await.unwrap();
        assert!(stat.is_container);
        let stat = storage.resolve(&ContentId::new("/empty")).await.unwrap();
        assert!(stat.is_container);
        let stat = storage.resolve(&ContentId::new("/p/nested/a.md")).await.unwrap();
        assert!(stat.exists && !stat.is_container);
        let stat = storage.resolve(&ContentId::new("/p/nest")).await.unwrap();
        assert!(!stat.exists);
    }

    #[tokio::test]
    async fn test_watch_notifications() {
        let storage = MemoryStorage::new();
        let id = ContentId::new("/w.md");
        let mut rx = storage.watch(&id);

        storage.write(id.clone(), "1");
        storage.write(id.clone(), "2");
        assert!(storage.delete(id.clone()));
        assert!(!storage.delete(id.clone()));

        assert_eq!(rx.recv().await.unwrap(), StorageChange::Added);
        assert_eq!(rx.recv().await.unwrap(), StorageChange::Updated);
        assert_eq!(rx.recv().await.unwrap(), StorageChange::Deleted);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let storage = MemoryStorage::new();
        let result = storage.read_stream(&ContentId::new("/none.md")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
