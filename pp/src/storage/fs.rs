//! Filesystem storage
//!
//! Reads go through `tokio::fs`. Change notifications come from a polling
//! task per watched identity that compares modification time and length
//! between polls. The task exits once every receiver is gone.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{ByteStream, CHANGE_CHANNEL_CAPACITY, ResourceStat, Storage, StorageChange, StorageError};
use crate::identity::ContentId;

const READ_CHUNK_SIZE: usize = 8 * 1024;

type Watchers = Mutex<HashMap<ContentId, broadcast::Sender<StorageChange>>>;

/// Storage over the local filesystem
pub struct FsStorage {
    poll_interval: Duration,
    watchers: Arc<Watchers>,
}

impl FsStorage {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            watchers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn path_of(identity: &ContentId) -> Result<PathBuf, StorageError> {
        if identity.is_url() {
            return Err(StorageError::Unsupported(identity.clone()));
        }
        Ok(identity.to_path())
    }
}

impl Default for FsStorage {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn resolve(&self, identity: &ContentId) -> Result<ResourceStat, StorageError> {
        debug!(%identity, "FsStorage::resolve: called");
        let path = Self::path_of(identity)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(ResourceStat::container()),
            Ok(meta) => Ok(ResourceStat::leaf(meta.modified().ok())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ResourceStat::missing()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn read_stream(&self, identity: &ContentId) -> Result<ByteStream, StorageError> {
        debug!(%identity, "FsStorage::read_stream: called");
        let path = Self::path_of(identity)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(identity.clone()),
            _ => StorageError::Io(e),
        })?;

        let chunks = stream::unfold(Some(file), |state| async move {
            let mut file = state?;
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(file)))
                }
                Err(e) => Some((Err(StorageError::Io(e)), None)),
            }
        });
        Ok(chunks.boxed())
    }

    fn watch(&self, identity: &ContentId) -> broadcast::Receiver<StorageChange> {
        debug!(%identity, "FsStorage::watch: called");
        let mut watchers = match self.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = watchers.get(identity) {
            return tx.subscribe();
        }

        let (tx, rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        watchers.insert(identity.clone(), tx.clone());
        tokio::spawn(poll_changes(
            identity.clone(),
            identity.to_path(),
            tx,
            self.poll_interval,
            Arc::downgrade(&self.watchers),
        ));
        rx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

async fn stamp(path: &Path) -> Option<FileStamp> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

async fn poll_changes(
    identity: ContentId,
    path: PathBuf,
    tx: broadcast::Sender<StorageChange>,
    interval: Duration,
    watchers: Weak<Watchers>,
) {
    info!(%identity, interval_ms = interval.as_millis() as u64, "FsStorage watcher started");
    let mut last = stamp(&path).await;

    loop {
        tokio::time::sleep(interval).await;

        if tx.receiver_count() == 0 {
            if let Some(watchers) = watchers.upgrade() {
                let mut map = match watchers.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                // A fresh subscriber may have re-armed the channel meanwhile
                if map.get(&identity).is_some_and(|t| t.receiver_count() == 0) {
                    map.remove(&identity);
                }
            }
            debug!(%identity, "poll_changes: no receivers left, stopping");
            return;
        }

        let current = stamp(&path).await;
        let change = match (&last, &current) {
            (None, Some(_)) => Some(StorageChange::Added),
            (Some(_), None) => Some(StorageChange::Deleted),
            (Some(a), Some(b)) if a != b => Some(StorageChange::Updated),
            _ => None,
        };
        if let Some(change) = change {
            debug!(%identity, ?change, "poll_changes: change detected");
            let _ = tx.send(change);
        }
        last = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolve() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.prompt.md");
        std::fs::write(&file, "hello").unwrap();
        let storage = FsStorage::default();

        let stat = storage.resolve(&ContentId::from_path(&file)).await.unwrap();
        assert!(stat.exists);
        assert!(!stat.is_container);

        let stat = storage.resolve(&ContentId::from_path(dir.path())).await.unwrap();
        assert!(stat.is_container);

        let stat = storage
            .resolve(&ContentId::from_path(dir.path().join("missing.md")))
            .await
            .unwrap();
        assert!(!stat.exists);
    }

    #[tokio::test]
    async fn test_read_stream_large_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("big.md");
        let content = "x".repeat(READ_CHUNK_SIZE * 2 + 17);
        std::fs::write(&file, &content).unwrap();

        let storage = FsStorage::default();
        let chunks: Vec<_> = storage
            .read_stream(&ContentId::from_path(&file))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(chunks.len() >= 3);
        let bytes: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap()).collect();
        assert_eq!(bytes, content.as_bytes());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::default();
        let result = storage
            .read_stream(&ContentId::from_path(dir.path().join("nope.md")))
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_urls_unsupported() {
        let storage = FsStorage::default();
        let result = storage.resolve(&ContentId::new("https://example.com/a.md")).await;
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_watch_reports_update_and_delete() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("w.prompt.md");
        std::fs::write(&file, "one").unwrap();

        let storage = FsStorage::new(Duration::from_millis(20));
        let mut rx = storage.watch(&ContentId::from_path(&file));
        tokio::time::sleep(Duration::from_millis(50)).await;

        std::fs::write(&file, "two, longer").unwrap();
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, StorageChange::Updated);

        std::fs::remove_file(&file).unwrap();
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, StorageChange::Deleted);
    }
}
