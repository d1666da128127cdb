//! Parser cache
//!
//! Hands out started parsers keyed by identity, one live parser per source.
//! File parsers and buffer parsers live in separate caches so an open buffer
//! never shadows the file it was loaded from.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ObjectCache;
use crate::identity::ContentId;
use crate::lifecycle::Disposable;
use crate::parser::PromptParser;
use crate::provider::ParseOptions;
use crate::storage::{Storage, TextBuffer};

pub struct ParserCache {
    storage: Arc<dyn Storage>,
    defaults: ParseOptions,
    files: ObjectCache<ContentId, PromptParser>,
    buffers: ObjectCache<ContentId, PromptParser>,
    cancel: CancellationToken,
}

impl ParserCache {
    /// Must be created and used from within a tokio runtime
    pub fn new(storage: Arc<dyn Storage>, defaults: ParseOptions) -> Self {
        let cancel = CancellationToken::new();
        let files = {
            let storage = storage.clone();
            let defaults = defaults.clone();
            let cancel = cancel.clone();
            ObjectCache::new(move |identity: &ContentId| {
                start(
                    PromptParser::for_file(identity.clone(), storage.clone(), defaults.clone()),
                    &cancel,
                )
            })
        };
        let buffers = ObjectCache::new(|identity: &ContentId| {
            panic!("buffer parser for '{}' requested without a buffer", identity)
        });

        Self {
            storage,
            defaults,
            files,
            buffers,
            cancel,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn defaults(&self) -> &ParseOptions {
        &self.defaults
    }

    /// Started parser for a stored file, created with the default options
    pub fn get(&self, identity: &ContentId) -> Arc<PromptParser> {
        self.files.get(identity)
    }

    /// Started parser for a stored file
    ///
    /// `options` only apply when a new parser is created; a live parser is
    /// returned as is.
    pub fn get_parser(&self, identity: &ContentId, options: &ParseOptions) -> Arc<PromptParser> {
        debug!(%identity, "ParserCache::get_parser: called");
        self.files.get_with(identity, |id| {
            start(
                PromptParser::for_file(id.clone(), self.storage.clone(), options.clone()),
                &self.cancel,
            )
        })
    }

    /// Started parser for an open buffer
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already disposed.
    pub fn get_buffer_parser(&self, buffer: Arc<dyn TextBuffer>, options: &ParseOptions) -> Arc<PromptParser> {
        let identity = buffer.identity();
        debug!(%identity, "ParserCache::get_buffer_parser: called");
        self.buffers.get_with(&identity, |_| {
            start(PromptParser::for_buffer(buffer, options.clone()), &self.cancel)
        })
    }

    /// Evict a file parser, optionally disposing it
    pub fn remove(&self, identity: &ContentId, should_dispose: bool) -> Option<Arc<PromptParser>> {
        self.files.remove(identity, should_dispose)
    }

    pub fn remove_buffer(&self, identity: &ContentId, should_dispose: bool) -> Option<Arc<PromptParser>> {
        self.buffers.remove(identity, should_dispose)
    }

    pub fn contains(&self, identity: &ContentId) -> bool {
        self.files.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every cached parser and stop background work
    pub fn dispose_all(&self) {
        info!(count = self.len(), "ParserCache disposing all parsers");
        self.cancel.cancel();
        self.files.clear();
        self.buffers.clear();
    }
}

impl Drop for ParserCache {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

fn start(parser: Arc<PromptParser>, cancel: &CancellationToken) -> Arc<PromptParser> {
    if !parser.is_disposed() {
        parser.start(cancel);
    }
    parser
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBuffer, MemoryStorage};
    use std::time::Duration;

    fn cache(storage: &MemoryStorage) -> ParserCache {
        ParserCache::new(Arc::new(storage.clone()), ParseOptions::default())
    }

    #[tokio::test]
    async fn test_same_parser_for_same_identity() {
        let storage = MemoryStorage::new();
        storage.write("/p/a.prompt.md", "x\n");
        let cache = cache(&storage);
        let id = ContentId::new("/p/a.prompt.md");

        let first = cache.get(&id);
        let second = cache.get_parser(&ContentId::new("/p/./a.prompt.md"), &ParseOptions::tracking());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_started());
        assert!(tokio::time::timeout(Duration::from_secs(5), first.settled()).await.unwrap());
    }

    #[tokio::test]
    async fn test_disposed_parser_replaced() {
        let storage = MemoryStorage::new();
        storage.write("/p/a.prompt.md", "x\n");
        let cache = cache(&storage);
        let id = ContentId::new("/p/a.prompt.md");

        let first = cache.get(&id);
        first.dispose();
        assert!(!cache.contains(&id));

        let second = cache.get(&id);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_disposed());
    }

    #[tokio::test]
    async fn test_buffer_parsers_evicted_when_buffer_closes() {
        let storage = MemoryStorage::new();
        let cache = cache(&storage);
        let buffer = Arc::new(MemoryBuffer::new("/b/a.prompt.md", "#file:x.md"));

        let parser = cache.get_buffer_parser(buffer.clone(), &ParseOptions::tracking());
        let again = cache.get_buffer_parser(buffer.clone(), &ParseOptions::tracking());
        assert!(Arc::ptr_eq(&parser, &again));
        assert_eq!(cache.len(), 1);

        buffer.dispose();
        assert!(parser.is_disposed());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let storage = MemoryStorage::new();
        let cache = cache(&storage);
        let a = cache.get(&ContentId::new("/p/a.prompt.md"));
        let b = cache.get(&ContentId::new("/p/b.prompt.md"));
        cache.dispose_all();
        assert!(a.is_disposed() && b.is_disposed());
        assert!(cache.is_empty());
    }
}
