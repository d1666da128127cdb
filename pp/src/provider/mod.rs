//! Content providers
//!
//! A provider turns one identity into a line stream for its current content
//! and announces when that content changes. Backend failures are re-wrapped
//! into [`ResolutionError`] here; nothing above this layer sees a
//! [`StorageError`](crate::storage::StorageError).

mod buffer;
mod file;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ResolutionError;
use crate::identity::ContentId;
use crate::kind::PromptKind;
use crate::lifecycle::{DisposeCallback, Disposable, Lifecycle};
use crate::storage::ByteStream;
use crate::stream::{DEFAULT_BATCH_SIZE, ObjectStream, StreamError};

pub use buffer::BufferContentProvider;
pub use file::FileContentProvider;

/// Language id reported for content that is not an eligible prompt file
pub const MARKDOWN_LANGUAGE_ID: &str = "markdown";

/// Options fixed at provider and parser construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParseOptions {
    /// Re-parse when the underlying content changes
    pub track_changes: bool,

    /// Accept content whose kind is not an eligible prompt kind
    pub allow_non_eligible: bool,

    /// Force the declared content type instead of deriving it from the name
    pub language_override: Option<String>,

    /// Items pulled per stream batch
    pub batch_size: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            track_changes: false,
            allow_non_eligible: false,
            language_override: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ParseOptions {
    pub fn tracking() -> Self {
        Self {
            track_changes: true,
            ..Default::default()
        }
    }
}

/// Change announced by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentChange {
    /// Content must be re-read in full
    Full,
    /// The backing resource is gone
    Deleted,
}

/// Produces the current content of one identity and announces changes
#[async_trait]
pub trait ContentProvider: Disposable {
    fn identity(&self) -> &ContentId;

    /// Short backend name for diagnostics
    fn source_name(&self) -> &'static str;

    /// Declared content type, if eligible or overridden
    fn kind(&self) -> Option<PromptKind>;

    fn language_id(&self) -> &'static str {
        self.kind().map_or(MARKDOWN_LANGUAGE_ID, |k| k.language_id())
    }

    /// Subscribe to change announcements
    fn subscribe(&self) -> broadcast::Receiver<ContentChange>;

    /// Begin change tracking. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if the provider is already disposed.
    fn start(&self, cancel: &CancellationToken);

    /// Line stream of the current content
    async fn contents(&self, cancel: &CancellationToken) -> Result<ObjectStream<String>, ResolutionError>;
}

/// State shared by every provider implementation
pub(crate) struct ProviderCore {
    pub identity: ContentId,
    pub options: ParseOptions,
    pub kind: Option<PromptKind>,
    pub changes: broadcast::Sender<ContentChange>,
    pub stop: CancellationToken,
    lifecycle: Lifecycle,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProviderCore {
    pub fn new(identity: ContentId, options: ParseOptions) -> Self {
        let kind = PromptKind::resolve(&identity, options.language_override.as_deref());
        let (changes, _) = broadcast::channel(crate::storage::CHANGE_CHANNEL_CAPACITY);
        Self {
            identity,
            options,
            kind,
            changes,
            stop: CancellationToken::new(),
            lifecycle: Lifecycle::new(),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Flip the started flag; returns true only for the first call
    pub fn begin_start(&self) -> bool {
        assert!(
            !self.lifecycle.is_disposed(),
            "cannot start a disposed content provider for '{}'",
            self.identity
        );
        !self.started.swap(true, Ordering::SeqCst)
    }

    /// Whether the content kind passes the eligibility filter
    pub fn is_eligible(&self) -> bool {
        self.kind.is_some() || self.options.allow_non_eligible
    }

    pub fn set_task(&self, task: JoinHandle<()>) {
        let mut guard = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = guard.replace(task) {
            previous.abort();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    pub fn on_dispose(&self, callback: DisposeCallback) {
        self.lifecycle.on_dispose(callback);
    }

    pub fn dispose(&self) {
        if !self.lifecycle.mark() {
            return;
        }
        debug!(identity = %self.identity, "ProviderCore::dispose: called");
        self.stop.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        self.lifecycle.run_callbacks();
    }

    /// Forward backend notifications as content changes until stopped
    pub fn spawn_forwarder<T, F>(&self, mut rx: broadcast::Receiver<T>, cancel: &CancellationToken, map: F)
    where
        T: Clone + Send + 'static,
        F: Fn(T) -> ContentChange + Send + 'static,
    {
        let tx = self.changes.clone();
        let stop = self.stop.clone();
        let cancel = cancel.clone();
        let identity = self.identity.clone();
        let task = tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => map(event),
                        // Missed events collapse into one full reload
                        Err(broadcast::error::RecvError::Lagged(_)) => ContentChange::Full,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                debug!(%identity, ?change, "ProviderCore::forwarder: content changed");
                let _ = tx.send(change);
            }
        });
        self.set_task(task);
    }
}

/// Split a byte stream into lines, each keeping its `\n` terminator
///
/// Splitting happens on bytes so multi-byte characters never straddle two
/// items. Read errors end the stream with a [`StreamError::Source`].
pub(crate) fn byte_lines(bytes: ByteStream) -> impl Stream<Item = Result<String, StreamError>> + Send + 'static {
    struct State {
        bytes: ByteStream,
        buffer: Vec<u8>,
        /// Bytes of `buffer` already known to hold no `\n`
        scanned: usize,
        ready: VecDeque<String>,
        done: bool,
    }

    let state = State {
        bytes,
        buffer: Vec::new(),
        scanned: 0,
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(&chunk);
                    let mut start = 0;
                    let mut from = st.scanned;
                    while let Some(offset) = st.buffer[from..].iter().position(|b| *b == b'\n') {
                        let end = from + offset + 1;
                        st.ready
                            .push_back(String::from_utf8_lossy(&st.buffer[start..end]).into_owned());
                        start = end;
                        from = end;
                    }
                    st.buffer.drain(..start);
                    st.scanned = st.buffer.len();
                }
                Some(Err(e)) => {
                    st.done = true;
                    st.ready.clear();
                    return Some((Err(StreamError::Source(e.to_string())), st));
                }
                None => {
                    st.done = true;
                    if !st.buffer.is_empty() {
                        let rest = std::mem::take(&mut st.buffer);
                        st.ready.push_back(String::from_utf8_lossy(&rest).into_owned());
                    }
                }
            }
        }
    })
}
