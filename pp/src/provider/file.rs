//! File-backed content provider

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ContentChange, ContentProvider, ParseOptions, ProviderCore, byte_lines};
use crate::errors::ResolutionError;
use crate::identity::ContentId;
use crate::kind::PromptKind;
use crate::lifecycle::{DisposeCallback, Disposable};
use crate::storage::{Storage, StorageChange};
use crate::stream::ObjectStream;

/// Reads content through a [`Storage`] backend
///
/// Only whole-content invalidation is supported: any add or update of the
/// resource re-announces [`ContentChange::Full`], a delete forwards
/// [`ContentChange::Deleted`].
pub struct FileContentProvider {
    core: ProviderCore,
    storage: Arc<dyn Storage>,
}

impl FileContentProvider {
    pub fn new(identity: ContentId, storage: Arc<dyn Storage>, options: ParseOptions) -> Self {
        debug!(%identity, ?options, "FileContentProvider::new: called");
        Self {
            core: ProviderCore::new(identity, options),
            storage,
        }
    }
}

#[async_trait]
impl ContentProvider for FileContentProvider {
    fn identity(&self) -> &ContentId {
        &self.core.identity
    }

    fn source_name(&self) -> &'static str {
        "file"
    }

    fn kind(&self) -> Option<PromptKind> {
        self.core.kind
    }

    fn subscribe(&self) -> broadcast::Receiver<ContentChange> {
        self.core.changes.subscribe()
    }

    fn start(&self, cancel: &CancellationToken) {
        if !self.core.begin_start() {
            return;
        }
        debug!(identity = %self.core.identity, track = self.core.options.track_changes, "FileContentProvider::start: called");
        if !self.core.options.track_changes {
            return;
        }
        let rx = self.storage.watch(&self.core.identity);
        self.core.spawn_forwarder(rx, cancel, |change| match change {
            StorageChange::Added | StorageChange::Updated => ContentChange::Full,
            StorageChange::Deleted => ContentChange::Deleted,
        });
    }

    async fn contents(&self, cancel: &CancellationToken) -> Result<ObjectStream<String>, ResolutionError> {
        let identity = &self.core.identity;
        debug!(%identity, "FileContentProvider::contents: called");

        if self.core.is_disposed() {
            return Err(ResolutionError::failed_to_resolve_stream(
                identity.clone(),
                "content provider is disposed",
            ));
        }

        let stat = self.storage.resolve(identity).await.map_err(|e| {
            warn!(%identity, error = %e, "FileContentProvider::contents: resolve failed");
            ResolutionError::open_failure(identity.clone(), e)
        })?;
        if !stat.exists {
            return Err(ResolutionError::open_failure(identity.clone(), "resource does not exist"));
        }
        if stat.is_container {
            return Err(ResolutionError::folder_reference(identity.clone(), None));
        }
        if !self.core.is_eligible() {
            return Err(ResolutionError::not_a_prompt_file(
                identity.clone(),
                Some("unsupported file name suffix".to_string()),
            ));
        }

        let bytes = self
            .storage
            .read_stream(identity)
            .await
            .map_err(|e| ResolutionError::open_failure(identity.clone(), e))?;
        Ok(ObjectStream::from_stream(byte_lines(bytes), cancel).with_batch_size(self.core.options.batch_size))
    }
}

impl Disposable for FileContentProvider {
    fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    fn dispose(&self) {
        self.core.dispose();
    }

    fn on_dispose(&self, callback: DisposeCallback) {
        self.core.on_dispose(callback);
    }
}

impl Drop for FileContentProvider {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    fn provider(storage: &MemoryStorage, path: &str, options: ParseOptions) -> FileContentProvider {
        FileContentProvider::new(ContentId::new(path), Arc::new(storage.clone()), options)
    }

    #[tokio::test]
    async fn test_contents_streams_lines() {
        let storage = MemoryStorage::new();
        storage.write("/p/a.prompt.md", "one\ntwo\n");
        let p = provider(&storage, "/p/a.prompt.md", ParseOptions::default());
        assert_eq!(p.language_id(), "prompt");
        assert_eq!(p.source_name(), "file");

        let cancel = CancellationToken::new();
        let lines = p.contents(&cancel).await.unwrap().collect_all().await.unwrap();
        assert_eq!(lines, vec!["one\n", "two\n"]);
    }

    #[tokio::test]
    async fn test_failure_mapping() {
        let storage = MemoryStorage::new();
        storage.write("/p/readme.md", "x");
        storage.create_dir("/p/dir.prompt.md");
        let cancel = CancellationToken::new();

        let missing = provider(&storage, "/p/none.prompt.md", ParseOptions::default());
        let err = missing.contents(&cancel).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::OpenFailure);

        let folder = provider(&storage, "/p/dir.prompt.md", ParseOptions::default());
        let err = folder.contents(&cancel).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FolderReference);
        assert!(err.is_not_a_prompt_file());

        let plain = provider(&storage, "/p/readme.md", ParseOptions::default());
        let err = plain.contents(&cancel).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotAPromptFile);
        assert_eq!(plain.language_id(), "markdown");

        let allowed = provider(
            &storage,
            "/p/readme.md",
            ParseOptions {
                allow_non_eligible: true,
                ..Default::default()
            },
        );
        assert!(allowed.contents(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_language_override() {
        let storage = MemoryStorage::new();
        let p = provider(
            &storage,
            "/p/readme.md",
            ParseOptions {
                language_override: Some("instructions".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(p.kind(), Some(PromptKind::Instructions));
        assert_eq!(p.language_id(), "instructions");
    }

    #[tokio::test]
    async fn test_tracking_forwards_changes() {
        let storage = MemoryStorage::new();
        storage.write("/p/a.prompt.md", "v1");
        let p = provider(&storage, "/p/a.prompt.md", ParseOptions::tracking());
        let mut rx = p.subscribe();
        let cancel = CancellationToken::new();
        p.start(&cancel);
        p.start(&cancel);

        storage.write("/p/a.prompt.md", "v2");
        let change = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change, ContentChange::Full);

        storage.delete("/p/a.prompt.md");
        let change = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change, ContentChange::Deleted);
    }

    #[tokio::test]
    async fn test_dispose_stops_and_fires_callbacks() {
        let storage = MemoryStorage::new();
        let p = provider(&storage, "/p/a.prompt.md", ParseOptions::tracking());
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = fired.clone();
        p.on_dispose(Box::new(move || f.store(true, std::sync::atomic::Ordering::SeqCst)));

        p.start(&CancellationToken::new());
        p.dispose();
        p.dispose();
        assert!(p.is_disposed());
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));

        let err = p.contents(&CancellationToken::new()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FailedToResolveStream);
    }
}
