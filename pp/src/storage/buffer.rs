//! Editable text buffers

use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::debug;

use super::CHANGE_CHANNEL_CAPACITY;
use crate::identity::ContentId;
use crate::lifecycle::{DisposeCallback, Lifecycle};

/// End-of-line sequence of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eol {
    #[default]
    Lf,
    CrLf,
}

impl Eol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// `CrLf` if the text contains any `\r\n`, otherwise `Lf`
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") { Self::CrLf } else { Self::Lf }
    }
}

/// Content edit notification; `version` is the buffer version after the edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferChange {
    pub version: u64,
}

/// Editable buffer backend interface
pub trait TextBuffer: Send + Sync {
    fn identity(&self) -> ContentId;

    fn line_count(&self) -> usize;

    /// Content of a 1-based line without its terminator
    fn line_content(&self, line: usize) -> Option<String>;

    fn eol(&self) -> Eol;

    fn version(&self) -> u64;

    fn is_disposed(&self) -> bool;

    /// Register a callback run when the buffer is about to go away
    fn on_will_dispose(&self, callback: DisposeCallback);

    fn subscribe_changes(&self) -> broadcast::Receiver<BufferChange>;
}

struct BufferState {
    lines: Vec<String>,
    eol: Eol,
    version: u64,
}

/// In-process editable buffer
pub struct MemoryBuffer {
    identity: ContentId,
    state: RwLock<BufferState>,
    changes: broadcast::Sender<BufferChange>,
    lifecycle: Lifecycle,
}

impl MemoryBuffer {
    pub fn new(identity: impl Into<ContentId>, text: &str) -> Self {
        let eol = Eol::detect(text);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            identity: identity.into(),
            state: RwLock::new(BufferState {
                lines: split_lines(text, eol),
                eol,
                version: 1,
            }),
            changes,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Replace the whole text; the end-of-line sequence is re-detected
    pub fn set_text(&self, text: &str) {
        debug!(identity = %self.identity, "MemoryBuffer::set_text: called");
        self.edit(|state| {
            state.eol = Eol::detect(text);
            state.lines = split_lines(text, state.eol);
            true
        });
    }

    /// Replace the content of a 1-based line; returns false if out of range
    pub fn replace_line(&self, line: usize, content: &str) -> bool {
        debug!(identity = %self.identity, line, "MemoryBuffer::replace_line: called");
        self.edit(|state| match line.checked_sub(1).and_then(|i| state.lines.get_mut(i)) {
            Some(slot) => {
                *slot = content.to_string();
                true
            }
            None => false,
        })
    }

    pub fn set_eol(&self, eol: Eol) {
        debug!(identity = %self.identity, ?eol, "MemoryBuffer::set_eol: called");
        self.edit(|state| {
            state.eol = eol;
            true
        });
    }

    /// Current text, lines joined with the buffer's own end-of-line
    pub fn snapshot(&self) -> String {
        let state = self.read();
        state.lines.join(state.eol.as_str())
    }

    pub fn dispose(&self) {
        if self.lifecycle.dispose() {
            debug!(identity = %self.identity, "MemoryBuffer::dispose: disposed");
        }
    }

    /// Apply an edit; version bump and notification only when it changed something
    fn edit(&self, apply: impl FnOnce(&mut BufferState) -> bool) -> bool {
        if self.lifecycle.is_disposed() {
            debug!(identity = %self.identity, "MemoryBuffer::edit: ignored, buffer disposed");
            return false;
        }
        let version = {
            let mut state = match self.state.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !apply(&mut state) {
                return false;
            }
            state.version += 1;
            state.version
        };
        let _ = self.changes.send(BufferChange { version });
        true
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BufferState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TextBuffer for MemoryBuffer {
    fn identity(&self) -> ContentId {
        self.identity.clone()
    }

    fn line_count(&self) -> usize {
        self.read().lines.len()
    }

    fn line_content(&self, line: usize) -> Option<String> {
        let index = line.checked_sub(1)?;
        self.read().lines.get(index).cloned()
    }

    fn eol(&self) -> Eol {
        self.read().eol
    }

    fn version(&self) -> u64 {
        self.read().version
    }

    fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    fn on_will_dispose(&self, callback: DisposeCallback) {
        self.lifecycle.on_dispose(callback);
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<BufferChange> {
        self.changes.subscribe()
    }
}

impl Drop for MemoryBuffer {
    fn drop(&mut self) {
        self.lifecycle.dispose();
    }
}

fn split_lines(text: &str, eol: Eol) -> Vec<String> {
    text.split(eol.as_str()).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_lines_and_snapshot() {
        let buffer = MemoryBuffer::new("/b.prompt.md", "one\r\ntwo\r\n");
        assert_eq!(buffer.eol(), Eol::CrLf);
        assert_eq!(buffer.line_count(), 3);
        assert_eq!(buffer.line_content(1).as_deref(), Some("one"));
        assert_eq!(buffer.line_content(3).as_deref(), Some(""));
        assert_eq!(buffer.line_content(0), None);
        assert_eq!(buffer.snapshot(), "one\r\ntwo\r\n");
    }

    #[test]
    fn test_edits_bump_version() {
        let buffer = MemoryBuffer::new("/b.md", "a\nb");
        let mut rx = buffer.subscribe_changes();
        let start = buffer.version();

        assert!(buffer.replace_line(2, "c"));
        assert!(!buffer.replace_line(9, "x"));
        buffer.set_eol(Eol::CrLf);

        assert_eq!(buffer.snapshot(), "a\r\nc");
        assert_eq!(buffer.version(), start + 2);
        assert_eq!(rx.try_recv().unwrap().version, start + 1);
    }

    #[test]
    fn test_dispose_runs_will_dispose() {
        let buffer = MemoryBuffer::new("/b.md", "a");
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        buffer.on_will_dispose(Box::new(move || f.store(true, Ordering::SeqCst)));

        buffer.dispose();
        assert!(buffer.is_disposed());
        assert!(fired.load(Ordering::SeqCst));

        buffer.set_text("ignored");
        assert_eq!(buffer.snapshot(), "a");
    }
}
