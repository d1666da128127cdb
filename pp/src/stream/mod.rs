//! Lazy object streams
//!
//! Turns a pull-based source (an iterator or an async stream) into a
//! push-style stream of discrete objects with cooperative batching, pause and
//! resume, and cancellation. Content providers emit text chunks through it and
//! the decoder emits tokens through it.

mod object_stream;

pub use object_stream::{DEFAULT_BATCH_SIZE, ObjectStream, StreamControl};

use thiserror::Error;

/// Errors delivered through a stream's error channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Source failed: {0}")]
    Source(String),

    #[error("Decode failed at line {line}: {message}")]
    Decode { line: usize, message: String },
}

/// One event observed by a stream consumer
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    /// The next object
    Data(T),
    /// The source failed; `End` follows
    Error(StreamError),
    /// No further events will be delivered
    End,
}
