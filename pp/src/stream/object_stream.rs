//! ObjectStream - lazy, pausable push stream over a pull source
//!
//! The producer task pulls up to `batch_size` items from the source, hands
//! them to a bounded channel (the internal buffer) and yields to the runtime
//! between batches. Production starts on the first read, never before.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{StreamError, StreamEvent};

/// Items pulled per batch before yielding control
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Cloneable handle to pause, resume or cancel a stream from outside its consumer
#[derive(Clone)]
pub struct StreamControl {
    paused: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
}

impl StreamControl {
    fn new(cancel: CancellationToken) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
            cancel,
        }
    }

    /// Stop pulling from the source; buffered items stay readable
    pub fn pause(&self) {
        debug!("StreamControl::pause: called");
        self.paused.send_replace(true);
    }

    /// Continue pulling exactly where the producer stopped
    pub fn resume(&self) {
        debug!("StreamControl::resume: called");
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// End the stream; no further data is delivered
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A lazily started stream of discrete objects
///
/// Every stream terminates with exactly one [`StreamEvent::End`], whether the
/// source ran dry, failed, or the stream was cancelled.
pub struct ObjectStream<T> {
    source: Option<BoxStream<'static, Result<T, StreamError>>>,
    rx: Option<mpsc::Receiver<Result<T, StreamError>>>,
    task: Option<JoinHandle<()>>,
    control: StreamControl,
    batch_size: usize,
    end_emitted: bool,
}

impl<T: Send + 'static> ObjectStream<T> {
    /// Stream over an async source of fallible items
    ///
    /// The stream owns a child of `cancel`: cancelling the parent ends this
    /// stream, ending this stream leaves the parent untouched.
    pub fn from_stream<S>(source: S, cancel: &CancellationToken) -> Self
    where
        S: Stream<Item = Result<T, StreamError>> + Send + 'static,
    {
        Self {
            source: Some(source.boxed()),
            rx: None,
            task: None,
            control: StreamControl::new(cancel.child_token()),
            batch_size: DEFAULT_BATCH_SIZE,
            end_emitted: false,
        }
    }

    /// Stream over an iterator of fallible items
    pub fn from_results<I>(items: I, cancel: &CancellationToken) -> Self
    where
        I: IntoIterator<Item = Result<T, StreamError>>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(items), cancel)
    }

    /// Stream over an iterator
    pub fn from_iter<I>(items: I, cancel: &CancellationToken) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(items.into_iter().map(Ok::<T, StreamError>)), cancel)
    }

    /// Stream over the elements of a vector
    pub fn from_vec(items: Vec<T>, cancel: &CancellationToken) -> Self {
        Self::from_iter(items, cancel)
    }

    /// Set the number of items pulled per batch (minimum 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    /// Whether production has begun
    pub fn is_started(&self) -> bool {
        self.source.is_none()
    }

    /// Whether the stream has ended or been asked to end
    pub fn is_ended(&self) -> bool {
        self.end_emitted || self.control.is_cancelled()
    }

    /// End the stream
    ///
    /// Idempotent: a second call neither re-emits `End` nor fails.
    pub fn end(&mut self) {
        if self.control.is_cancelled() {
            return;
        }
        debug!("ObjectStream::end: called");
        self.control.cancel();
        self.source = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn ensure_started(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        debug!(batch_size = self.batch_size, "ObjectStream::ensure_started: spawning producer");
        let (tx, rx) = mpsc::channel(self.batch_size);
        let paused = self.control.paused.subscribe();
        let cancel = self.control.cancel.clone();
        self.task = Some(tokio::spawn(produce(source, tx, paused, cancel, self.batch_size)));
        self.rx = Some(rx);
    }

    /// Receive the next event, starting production on first use
    ///
    /// Returns `None` once `End` has been delivered.
    pub async fn next_event(&mut self) -> Option<StreamEvent<T>> {
        if self.end_emitted {
            return None;
        }
        if self.control.is_cancelled() {
            return Some(self.emit_end());
        }
        self.ensure_started();

        let cancel = self.control.cancel.clone();
        let received = match self.rx.as_mut() {
            Some(rx) => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = rx.recv() => item,
            },
            None => None,
        };

        match received {
            Some(Ok(item)) => Some(StreamEvent::Data(item)),
            Some(Err(e)) => {
                debug!(error = %e, "ObjectStream::next_event: source error");
                Some(StreamEvent::Error(e))
            }
            None => Some(self.emit_end()),
        }
    }

    fn emit_end(&mut self) -> StreamEvent<T> {
        debug!("ObjectStream::emit_end: stream ended");
        self.end_emitted = true;
        self.control.cancel();
        self.rx = None;
        StreamEvent::End
    }

    /// Drain the stream, failing on the first error
    pub async fn collect_all(mut self) -> Result<Vec<T>, StreamError> {
        let mut items = Vec::new();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Data(item) => items.push(item),
                StreamEvent::Error(e) => return Err(e),
                StreamEvent::End => break,
            }
        }
        Ok(items)
    }
}

async fn produce<T>(
    mut source: BoxStream<'static, Result<T, StreamError>>,
    tx: mpsc::Sender<Result<T, StreamError>>,
    mut paused: watch::Receiver<bool>,
    cancel: CancellationToken,
    batch_size: usize,
) {
    loop {
        // Pause gate between batches
        loop {
            let is_paused = *paused.borrow_and_update();
            if !is_paused {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        for _ in 0..batch_size {
            if cancel.is_cancelled() {
                return;
            }
            if *paused.borrow() {
                break;
            }
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                item = source.next() => item,
            };
            let Some(item) = item else {
                debug!("produce: source exhausted");
                return;
            };
            let failed = item.is_err();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
            if failed {
                return;
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

impl<T> Drop for ObjectStream<T> {
    fn drop(&mut self) {
        self.control.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T: Send + 'static> Stream for ObjectStream<T> {
    type Item = Result<T, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.end_emitted {
            return Poll::Ready(None);
        }
        if this.control.is_cancelled() {
            this.emit_end();
            return Poll::Ready(None);
        }
        this.ensure_started();
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                this.emit_end();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn drain<T: Send + 'static>(stream: &mut ObjectStream<T>) -> (Vec<T>, Vec<StreamError>, usize) {
        let mut items = Vec::new();
        let mut errors = Vec::new();
        let mut ends = 0;
        while let Some(event) = stream.next_event().await {
            match event {
                StreamEvent::Data(item) => items.push(item),
                StreamEvent::Error(e) => errors.push(e),
                StreamEvent::End => ends += 1,
            }
        }
        (items, errors, ends)
    }

    #[tokio::test]
    async fn test_from_vec_in_order_once() {
        let cancel = CancellationToken::new();
        let mut stream = ObjectStream::from_vec(vec!["a", "b", "c"], &cancel);

        let (items, errors, ends) = drain(&mut stream).await;
        assert_eq!(items, vec!["a", "b", "c"]);
        assert!(errors.is_empty());
        assert_eq!(ends, 1);
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_ends_immediately() {
        let cancel = CancellationToken::new();
        let mut stream = ObjectStream::<u32>::from_vec(Vec::new(), &cancel);

        assert_eq!(stream.next_event().await, Some(StreamEvent::End));
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn test_thousand_items() {
        let cancel = CancellationToken::new();
        let input: Vec<u32> = (0..1000).collect();
        let mut stream = ObjectStream::from_vec(input.clone(), &cancel);

        let (items, _, ends) = drain(&mut stream).await;
        assert_eq!(items, input);
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn test_lazy_start() {
        let cancel = CancellationToken::new();
        let pulled = Arc::new(AtomicUsize::new(0));
        let p = pulled.clone();
        let mut stream = ObjectStream::from_iter(
            (0..10).map(move |i| {
                p.fetch_add(1, Ordering::SeqCst);
                i
            }),
            &cancel,
        );

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!stream.is_started());
        assert_eq!(pulled.load(Ordering::SeqCst), 0);

        assert_eq!(stream.next_event().await, Some(StreamEvent::Data(0)));
        assert!(stream.is_started());
    }

    #[tokio::test]
    async fn test_cancel_truncates_and_ends() {
        let cancel = CancellationToken::new();
        let mut stream = ObjectStream::from_iter(0u64.., &cancel).with_batch_size(4);

        let mut received = Vec::new();
        for _ in 0..10 {
            match stream.next_event().await {
                Some(StreamEvent::Data(n)) => received.push(n),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        cancel.cancel();

        let (rest, _, ends) = drain(&mut stream).await;
        assert!(rest.is_empty());
        assert_eq!(ends, 1);
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let cancel = CancellationToken::new();
        let mut stream = ObjectStream::from_vec(vec![1, 2, 3], &cancel);

        stream.end();
        stream.end();
        assert!(stream.is_ended());
        assert_eq!(stream.next_event().await, Some(StreamEvent::End));
        assert_eq!(stream.next_event().await, None);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_error_then_end() {
        let cancel = CancellationToken::new();
        let mut stream = ObjectStream::from_results(
            vec![
                Ok(1),
                Err(StreamError::Source("broken".to_string())),
                Ok(2),
            ],
            &cancel,
        );

        let (items, errors, ends) = drain(&mut stream).await;
        assert_eq!(items, vec![1]);
        assert_eq!(errors, vec![StreamError::Source("broken".to_string())]);
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn test_pause_stops_pulling_and_resume_continues() {
        let cancel = CancellationToken::new();
        let pulled = Arc::new(AtomicUsize::new(0));
        let p = pulled.clone();
        let mut stream = ObjectStream::from_iter(
            (0..100u32).map(move |i| {
                p.fetch_add(1, Ordering::SeqCst);
                i
            }),
            &cancel,
        )
        .with_batch_size(2);
        let control = stream.control();

        assert_eq!(stream.next_event().await, Some(StreamEvent::Data(0)));
        control.pause();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let while_paused = pulled.load(Ordering::SeqCst);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pulled.load(Ordering::SeqCst), while_paused);
        assert!(while_paused < 100);

        control.resume();
        let (rest, _, ends) = drain(&mut stream).await;
        assert_eq!(rest, (1..100).collect::<Vec<_>>());
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn test_parent_cancel_ends_stream() {
        let parent = CancellationToken::new();
        let mut stream = ObjectStream::from_iter(0u32.., &parent);
        assert_eq!(stream.next_event().await, Some(StreamEvent::Data(0)));

        parent.cancel();
        assert_eq!(stream.next_event().await, Some(StreamEvent::End));
    }

    #[tokio::test]
    async fn test_as_futures_stream() {
        let cancel = CancellationToken::new();
        let stream = ObjectStream::from_vec(vec![1, 2, 3], &cancel);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![Ok(1), Ok(2), Ok(3)]);
    }

    #[tokio::test]
    async fn test_collect_all() {
        let cancel = CancellationToken::new();
        let stream = ObjectStream::from_vec(vec!['x', 'y'], &cancel);
        assert_eq!(stream.collect_all().await.unwrap(), vec!['x', 'y']);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_delivers_input_exactly_once(input in proptest::collection::vec(any::<u16>(), 0..300), batch in 1usize..64) {
                let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                let output = rt.block_on(async {
                    let cancel = CancellationToken::new();
                    let stream = ObjectStream::from_vec(input.clone(), &cancel).with_batch_size(batch);
                    stream.collect_all().await.unwrap()
                });
                prop_assert_eq!(output, input);
            }
        }
    }
}
