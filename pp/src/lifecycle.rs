//! Disposal lifecycle
//!
//! Providers, buffers and parsers own resources (tasks, channels, watchers)
//! that must be released exactly once. [`Lifecycle`] tracks the disposed flag
//! and runs registered callbacks synchronously on the first `dispose`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Callback run once when an object disposes
pub type DisposeCallback = Box<dyn FnOnce() + Send + 'static>;

/// An object with an explicit, idempotent end of life
pub trait Disposable: Send + Sync {
    /// Whether `dispose` has already run
    fn is_disposed(&self) -> bool;

    /// Release all resources. Safe to call more than once.
    fn dispose(&self);

    /// Register a callback to run when this object disposes
    ///
    /// Runs immediately if the object is already disposed.
    fn on_dispose(&self, callback: DisposeCallback);
}

/// Disposed flag plus the callbacks waiting on it
#[derive(Default)]
pub struct Lifecycle {
    disposed: AtomicBool,
    callbacks: Mutex<Vec<DisposeCallback>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Mark disposed and run callbacks
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn dispose(&self) -> bool {
        if !self.mark() {
            return false;
        }
        self.run_callbacks();
        true
    }

    /// Set the disposed flag without running callbacks
    ///
    /// Lets an owner flip the flag first, release its own resources, then call
    /// [`Lifecycle::run_callbacks`]. Returns `true` only for the first call.
    pub fn mark(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    /// Drain and run registered callbacks
    pub fn run_callbacks(&self) {
        // Callbacks may re-enter (e.g. cache eviction), so run them unlocked
        let callbacks = match self.callbacks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        debug!(callbacks = callbacks.len(), "Lifecycle::run_callbacks: called");
        for callback in callbacks {
            callback();
        }
    }

    pub fn on_dispose(&self, callback: DisposeCallback) {
        if self.is_disposed() {
            callback();
            return;
        }
        let mut guard = match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Re-check under the lock: dispose may have drained the list meanwhile
        if self.is_disposed() {
            drop(guard);
            callback();
        } else {
            guard.push(callback);
        }
    }
}
