//! Buffer-backed content provider

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ContentChange, ContentProvider, ParseOptions, ProviderCore};
use crate::errors::ResolutionError;
use crate::identity::ContentId;
use crate::kind::PromptKind;
use crate::lifecycle::{DisposeCallback, Disposable};
use crate::storage::TextBuffer;
use crate::stream::{ObjectStream, StreamError};

/// Reads content from an already open [`TextBuffer`]
///
/// The stream walks the buffer line by line and re-inserts the buffer's own
/// end-of-line sequence between lines, so the result is byte-identical to the
/// buffer text. The provider disposes itself when the buffer goes away.
pub struct BufferContentProvider {
    core: ProviderCore,
    buffer: Arc<dyn TextBuffer>,
}

impl BufferContentProvider {
    pub fn new(buffer: Arc<dyn TextBuffer>, options: ParseOptions) -> Arc<Self> {
        let identity = buffer.identity();
        debug!(%identity, ?options, "BufferContentProvider::new: called");
        let provider = Arc::new(Self {
            core: ProviderCore::new(identity, options),
            buffer: buffer.clone(),
        });

        let weak = Arc::downgrade(&provider);
        buffer.on_will_dispose(Box::new(move || {
            if let Some(provider) = weak.upgrade() {
                provider.dispose();
            }
        }));
        provider
    }
}

#[async_trait]
impl ContentProvider for BufferContentProvider {
    fn identity(&self) -> &ContentId {
        &self.core.identity
    }

    fn source_name(&self) -> &'static str {
        "buffer"
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
        debug!(identity = %self.core.identity, track = self.core.options.track_changes, "BufferContentProvider::start: called");
        if !self.core.options.track_changes {
            return;
        }
        let rx = self.buffer.subscribe_changes();
        self.core.spawn_forwarder(rx, cancel, |_| ContentChange::Full);
    }

    async fn contents(&self, cancel: &CancellationToken) -> Result<ObjectStream<String>, ResolutionError> {
        let identity = &self.core.identity;
        debug!(%identity, "BufferContentProvider::contents: called");

        if self.core.is_disposed() || self.buffer.is_disposed() {
            return Err(ResolutionError::open_failure(identity.clone(), "buffer is disposed"));
        }
        if !self.core.is_eligible() {
            return Err(ResolutionError::not_a_prompt_file(
                identity.clone(),
                Some("unsupported language".to_string()),
            ));
        }

        let buffer = self.buffer.clone();
        let lines = stream::unfold(Some(1usize), move |next| {
            let buffer = buffer.clone();
            async move {
                let line = next?;
                if buffer.is_disposed() {
                    return Some((Err(StreamError::Source("buffer disposed while reading".to_string())), None));
                }
                let count = buffer.line_count();
                if line > count {
                    return None;
                }
                let mut text = buffer.line_content(line)?;
                if line < count {
                    text.push_str(buffer.eol().as_str());
                }
                Some((Ok(text), Some(line + 1)))
            }
        });
        Ok(ObjectStream::from_stream(lines, cancel).with_batch_size(self.core.options.batch_size))
    }
}

impl Disposable for BufferContentProvider {
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

impl Drop for BufferContentProvider {
    fn drop(&mut self) {
        self.core.dispose();
    }
}
