//! PromptParser - parse state machine over a content provider
//!
//! One worker task per parser consumes the provider's change announcements
//! and runs one parse round per change. Rounds are serialized: a change that
//! arrives while a round is in flight cancels that round and starts over with
//! the newest content, so only the latest round of a burst ever settles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Header, ParserError, ParserUpdate, Reference};
use crate::codec::{Decoder, MarkdownDecoder, Token};
use crate::errors::ResolutionError;
use crate::identity::ContentId;
use crate::kind::PromptKind;
use crate::lifecycle::{DisposeCallback, Disposable, Lifecycle};
use crate::provider::{BufferContentProvider, ContentChange, ContentProvider, FileContentProvider, ParseOptions};
use crate::storage::{Storage, TextBuffer};
use crate::stream::StreamEvent;

/// Capacity of the update channel
const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct ParseState {
    round: u64,
    tokens: Vec<Token>,
    header: Option<Header>,
    references: Vec<Reference>,
    error: Option<ResolutionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Idle,
    Pending,
    Settled { round: u64, ok: bool },
}

/// State shared between the parser handle and its worker task
struct ParserShared {
    identity: ContentId,
    provider: Arc<dyn ContentProvider>,
    decoder: Arc<dyn Decoder>,
    state: Mutex<ParseState>,
    updates: broadcast::Sender<ParserUpdate>,
    settlement: watch::Sender<Settlement>,
}

impl ParserShared {
    fn state(&self) -> MutexGuard<'_, ParseState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, update: ParserUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    /// Drop the previous round's results and open a new round
    fn begin_round(&self) -> u64 {
        let round = {
            let mut state = self.state();
            let round = state.round + 1;
            *state = ParseState {
                round,
                ..Default::default()
            };
            round
        };
        self.settlement.send_replace(Settlement::Pending);
        self.publish(ParserUpdate::ContentChanged { round });
        round
    }

    fn accept(&self, round: u64, token: Token) {
        let mut header_parsed = false;
        let mut added = None;
        {
            let mut state = self.state();
            if token.is_header_opening() && state.header.is_none() && state.tokens.is_empty() {
                state.header = Header::from_token(self.provider.kind(), &token);
                header_parsed = state.header.is_some();
            } else if let Some(reference) = Reference::from_token(&self.identity, &token) {
                state.references.push(reference.clone());
                added = Some(reference);
            }
            state.tokens.push(token);
        }

        if header_parsed {
            self.publish(ParserUpdate::HeaderParsed { round });
        }
        if let Some(reference) = added {
            debug!(identity = %self.identity, target = %reference.identity, "PromptParser: reference found");
            self.publish(ParserUpdate::ReferenceAdded { round, reference });
        }
    }

    fn fail(&self, round: u64, error: ResolutionError) {
        warn!(identity = %self.identity, round, error = %error, "PromptParser: round failed");
        self.state().error = Some(error);
        self.publish(ParserUpdate::Settled { round, ok: false });
        self.settlement.send_replace(Settlement::Settled { round, ok: false });
    }

    /// Close the open round as failed when the start signal is cancelled
    ///
    /// Waiters on [`PromptParser::settled`] would otherwise never wake.
    fn abandon(&self) {
        let open = !matches!(*self.settlement.borrow(), Settlement::Settled { .. });
        if !open {
            return;
        }
        let round = self.state().round;
        debug!(identity = %self.identity, round, "PromptParser: round abandoned");
        self.publish(ParserUpdate::Settled { round, ok: false });
        self.settlement.send_replace(Settlement::Settled { round, ok: false });
    }

    fn settle(&self, round: u64) {
        let ok = {
            let state = self.state();
            state.error.is_none() && state.header.as_ref().is_none_or(Header::is_valid)
        };
        debug!(identity = %self.identity, round, ok, "PromptParser: round settled");
        self.publish(ParserUpdate::Settled { round, ok });
        self.settlement.send_replace(Settlement::Settled { round, ok });
    }
}

/// Streaming parser for one prompt source
///
/// Create it with [`PromptParser::new`] (or the `for_file`/`for_buffer`
/// helpers), call [`start`](PromptParser::start), then await
/// [`settled`](PromptParser::settled). Dropping the last handle disposes it.
pub struct PromptParser {
    shared: Arc<ParserShared>,
    lifecycle: Lifecycle,
    started: AtomicBool,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PromptParser {
    pub fn new(provider: Arc<dyn ContentProvider>, decoder: Arc<dyn Decoder>) -> Arc<Self> {
        let identity = provider.identity().clone();
        debug!(%identity, source = provider.source_name(), "PromptParser::new: called");
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (settlement, _) = watch::channel(Settlement::Idle);

        let parser = Arc::new(Self {
            shared: Arc::new(ParserShared {
                identity,
                provider: provider.clone(),
                decoder,
                state: Mutex::new(ParseState::default()),
                updates,
                settlement,
            }),
            lifecycle: Lifecycle::new(),
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
            task: Mutex::new(None),
        });

        // A provider that goes away (e.g. its buffer closed) takes the parser with it
        let weak = Arc::downgrade(&parser);
        provider.on_dispose(Box::new(move || {
            if let Some(parser) = weak.upgrade() {
                parser.dispose();
            }
        }));
        parser
    }

    /// Parser over a storage-backed file with the default decoder
    pub fn for_file(identity: ContentId, storage: Arc<dyn Storage>, options: ParseOptions) -> Arc<Self> {
        let provider = Arc::new(FileContentProvider::new(identity, storage, options));
        Self::new(provider, Arc::new(MarkdownDecoder::new()))
    }

    /// Parser over an open text buffer with the default decoder
    pub fn for_buffer(buffer: Arc<dyn TextBuffer>, options: ParseOptions) -> Arc<Self> {
        let provider = BufferContentProvider::new(buffer, options);
        Self::new(provider, Arc::new(MarkdownDecoder::new()))
    }

    /// Start parsing and, if the provider tracks changes, re-parsing
    ///
    /// No-op when already started.
    ///
    /// # Panics
    ///
    /// Panics if the parser is disposed. Use [`try_start`](Self::try_start)
    /// to get an error value instead.
    pub fn start(&self, cancel: &CancellationToken) {
        assert!(
            !self.is_disposed(),
            "cannot start a disposed prompt parser for '{}'",
            self.shared.identity
        );
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(identity = %self.shared.identity, "Prompt parser started");

        // Subscribe before the provider starts so no announcement is missed
        let changes = self.shared.provider.subscribe();
        self.shared.provider.start(cancel);

        let task = tokio::spawn(run(self.shared.clone(), changes, self.stop.clone(), cancel.clone()));
        let mut guard = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(task);
    }

    pub fn try_start(&self, cancel: &CancellationToken) -> Result<(), ParserError> {
        if self.is_disposed() {
            return Err(ParserError::Disposed(self.shared.identity.clone()));
        }
        self.start(cancel);
        Ok(())
    }

    /// Wait for the current round to settle
    ///
    /// Waits until at least one round has been observed. Returns `false` if
    /// the round failed, the header is invalid, or the parser was disposed
    /// while waiting.
    pub async fn settled(&self) -> bool {
        debug!(identity = %self.shared.identity, "PromptParser::settled: called");
        let mut rx = self.shared.settlement.subscribe();
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            result = rx.wait_for(|s| matches!(s, Settlement::Settled { .. })) => {
                result.is_ok_and(|s| matches!(*s, Settlement::Settled { ok: true, .. }))
            }
        }
    }

    /// Subscribe to update events
    pub fn subscribe(&self) -> broadcast::Receiver<ParserUpdate> {
        self.shared.updates.subscribe()
    }

    pub fn identity(&self) -> &ContentId {
        &self.shared.identity
    }

    pub fn kind(&self) -> Option<PromptKind> {
        self.shared.provider.kind()
    }

    pub fn language_id(&self) -> &'static str {
        self.shared.provider.language_id()
    }

    /// Tokens of the current round, in source order
    pub fn tokens(&self) -> Vec<Token> {
        self.shared.state().tokens.clone()
    }

    pub fn header(&self) -> Option<Header> {
        self.shared.state().header.clone()
    }

    pub fn references(&self) -> Vec<Reference> {
        self.shared.state().references.clone()
    }

    /// Error condition of the current round
    pub fn error_condition(&self) -> Option<ResolutionError> {
        self.shared.state().error.clone()
    }

    /// Root error for diagnostics
    ///
    /// For a single source this is its own error condition; see
    /// [`ResolvedPrompt::top_error`](crate::resolver::ResolvedPrompt::top_error)
    /// for whole reference trees.
    pub fn top_error(&self) -> Option<ResolutionError> {
        self.error_condition()
    }

    /// Rendered text of every token after the header's end line
    pub fn get_body(&self) -> String {
        let state = self.shared.state();
        let after = state.header.as_ref().map_or(0, |h| h.range().end_line);
        state
            .tokens
            .iter()
            .filter(|t| t.range.start_line > after)
            .map(Token::render)
            .collect()
    }

    /// Number of parse rounds started so far
    pub fn round(&self) -> u64 {
        self.shared.state().round
    }

    /// Round of the last settlement, if the current round has settled
    pub fn settled_round(&self) -> Option<u64> {
        match *self.shared.settlement.borrow() {
            Settlement::Settled { round, .. } => Some(round),
            Settlement::Idle | Settlement::Pending => None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Disposable for PromptParser {
    fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    fn dispose(&self) {
        if !self.lifecycle.mark() {
            return;
        }
        info!(identity = %self.shared.identity, "Prompt parser disposed");
        self.stop.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        {
            let mut state = self.shared.state();
            state.tokens.clear();
            state.header = None;
            state.references.clear();
        }
        self.shared.provider.dispose();
        self.lifecycle.run_callbacks();
    }

    fn on_dispose(&self, callback: DisposeCallback) {
        self.lifecycle.on_dispose(callback);
    }
}

impl Drop for PromptParser {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(
    shared: Arc<ParserShared>,
    mut changes: broadcast::Receiver<ContentChange>,
    stop: CancellationToken,
    cancel: CancellationToken,
) {
    let mut pending = Some(ContentChange::Full);
    let mut closed = false;

    loop {
        let change = match pending.take() {
            Some(change) => change,
            None if closed => break,
            None => tokio::select! {
                _ = stop.cancelled() => break,
                _ = cancel.cancelled() => {
                    shared.abandon();
                    break;
                }
                received = changes.recv() => match received {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(_)) => ContentChange::Full,
                    Err(broadcast::error::RecvError::Closed) => {
                        closed = true;
                        continue;
                    }
                },
            },
        };

        let cycle = stop.child_token();
        let work = process(&shared, change, &cycle);
        tokio::pin!(work);

        loop {
            tokio::select! {
                _ = &mut work => break,
                _ = stop.cancelled() => return,
                _ = cancel.cancelled() => {
                    cycle.cancel();
                    shared.abandon();
                    return;
                }
                received = changes.recv(), if !closed => match received {
                    Ok(next) => {
                        debug!(identity = %shared.identity, ?next, "PromptParser: round superseded");
                        cycle.cancel();
                        pending = Some(next);
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        cycle.cancel();
                        pending = Some(ContentChange::Full);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => closed = true,
                },
            }
        }
    }
    debug!(identity = %shared.identity, "PromptParser: worker stopped");
}

/// One parse round
///
/// Deletion is handled like any other change: the re-read fails and the
/// provider's error becomes the round's error.
async fn process(shared: &ParserShared, change: ContentChange, cancel: &CancellationToken) {
    let round = shared.begin_round();
    debug!(identity = %shared.identity, round, ?change, "PromptParser::process: called");

    let chunks = match shared.provider.contents(cancel).await {
        Ok(chunks) => chunks,
        Err(error) => {
            if !cancel.is_cancelled() {
                shared.fail(round, error);
            }
            return;
        }
    };

    let mut tokens = shared.decoder.decode(chunks, cancel);
    let mut stream_error = None;
    while let Some(event) = tokens.next_event().await {
        match event {
            StreamEvent::Data(token) => shared.accept(round, token),
            StreamEvent::Error(e) => stream_error = Some(e),
            StreamEvent::End => break,
        }
    }

    if cancel.is_cancelled() {
        debug!(identity = %shared.identity, round, "PromptParser::process: cancelled");
        return;
    }
    match stream_error {
        Some(e) => shared.fail(
            round,
            ResolutionError::failed_to_resolve_stream(shared.identity.clone(), e),
        ),
        None => shared.settle(round),
    }
}
