//! Storage backends
//!
//! The parser never touches files or editor buffers directly. It reads
//! through two narrow capability interfaces:
//!
//! - [`Storage`]: resolve metadata, open a byte stream, watch for changes
//! - [`TextBuffer`]: an already-open editable buffer, read line by line
//!
//! [`FsStorage`] and [`MemoryStorage`] implement the first, [`MemoryBuffer`]
//! the second.

mod buffer;
mod fs;
mod memory;

use std::time::SystemTime;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::identity::ContentId;

pub use buffer::{BufferChange, Eol, MemoryBuffer, TextBuffer};
pub use fs::FsStorage;
pub use memory::MemoryStorage;

/// Capacity of per-identity change channels
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Backend failures; these never cross the provider boundary
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Resource not found: {0}")]
    NotFound(ContentId),

    #[error("Resource is a container: {0}")]
    IsContainer(ContentId),

    #[error("Unsupported identity: {0}")]
    Unsupported(ContentId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata returned by [`Storage::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceStat {
    pub exists: bool,
    pub is_container: bool,
    pub modified: Option<SystemTime>,
}

impl ResourceStat {
    pub fn missing() -> Self {
        Self {
            exists: false,
            is_container: false,
            modified: None,
        }
    }

    pub fn leaf(modified: Option<SystemTime>) -> Self {
        Self {
            exists: true,
            is_container: false,
            modified,
        }
    }

    pub fn container() -> Self {
        Self {
            exists: true,
            is_container: true,
            modified: None,
        }
    }
}

/// Change notification for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageChange {
    Added,
    Updated,
    Deleted,
}

/// Byte stream of one resource
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StorageError>>;

/// Storage backend interface
#[async_trait]
pub trait Storage: Send + Sync {
    /// Metadata for an identity. A missing resource is `Ok` with `exists == false`.
    async fn resolve(&self, identity: &ContentId) -> Result<ResourceStat, StorageError>;

    /// Open the current content as a stream of byte chunks
    async fn read_stream(&self, identity: &ContentId) -> Result<ByteStream, StorageError>;

    /// Subscribe to change notifications for an identity
    ///
    /// Must be called from within a tokio runtime.
    fn watch(&self, identity: &ContentId) -> broadcast::Receiver<StorageChange>;
}
