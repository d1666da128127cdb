//! ObjectCache - at most one live instance per key
//!
//! Liveness is the value's own disposed flag. A disposed value is evicted
//! lazily on the next `get`, and eagerly through a callback registered on
//! the value when it is inserted. Every insert gets a generation number so a
//! late callback from an old value never evicts its replacement.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::lifecycle::Disposable;

/// Creates a value for a key
pub type Factory<K, V> = Box<dyn Fn(&K) -> Arc<V> + Send + Sync>;

struct Entry<V> {
    value: Arc<V>,
    generation: u64,
}

struct Entries<K, V> {
    map: HashMap<K, Entry<V>>,
    next_generation: u64,
}

type SharedEntries<K, V> = Arc<Mutex<Entries<K, V>>>;

fn lock<K, V>(entries: &Mutex<Entries<K, V>>) -> MutexGuard<'_, Entries<K, V>> {
    match entries.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keyed registry of disposable values
pub struct ObjectCache<K, V> {
    entries: SharedEntries<K, V>,
    factory: Factory<K, V>,
}

impl<K, V> ObjectCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Disposable + 'static,
{
    pub fn new(factory: impl Fn(&K) -> Arc<V> + Send + Sync + 'static) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                map: HashMap::new(),
                next_generation: 0,
            })),
            factory: Box::new(factory),
        }
    }

    /// Live value for `key`, creating it with the cache's factory if needed
    pub fn get(&self, key: &K) -> Arc<V> {
        self.get_with(key, |k| (self.factory)(k))
    }

    /// Live value for `key`, creating it with `create` if needed
    ///
    /// `create` runs at most once per call and only when no live value exists.
    ///
    /// # Panics
    ///
    /// Panics if `create` returns a value that is already disposed.
    pub fn get_with(&self, key: &K, create: impl FnOnce(&K) -> Arc<V>) -> Arc<V> {
        let (value, generation, evicted) = {
            let mut entries = lock(&self.entries);
            let mut evicted = None;
            if let Some(entry) = entries.map.get(key) {
                if !entry.value.is_disposed() {
                    return entry.value.clone();
                }
                debug!(?key, "ObjectCache::get: evicting disposed value");
                evicted = entries.map.remove(key);
            }

            debug!(?key, "ObjectCache::get: creating value");
            let value = create(key);
            assert!(
                !value.is_disposed(),
                "object cache factory returned an already disposed value for key {:?}",
                key
            );
            let generation = entries.next_generation;
            entries.next_generation += 1;
            entries.map.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    generation,
                },
            );
            (value, generation, evicted)
        };
        drop(evicted);

        // Registered outside the lock: the callback takes the lock itself
        let weak = Arc::downgrade(&self.entries);
        let key = key.clone();
        value.on_dispose(Box::new(move || {
            let Some(entries) = weak.upgrade() else {
                return;
            };
            let removed = {
                let mut entries = lock(&entries);
                if entries.map.get(&key).is_some_and(|e| e.generation == generation) {
                    debug!(?key, "ObjectCache: value disposed, evicting");
                    entries.map.remove(&key)
                } else {
                    None
                }
            };
            drop(removed);
        }));
        value
    }

    /// Evict `key`, optionally disposing the removed value
    ///
    /// Without `should_dispose` the value is returned untouched and the
    /// caller keeps ownership.
    pub fn remove(&self, key: &K, should_dispose: bool) -> Option<Arc<V>> {
        let removed = lock(&self.entries).map.remove(key)?;
        debug!(?key, should_dispose, "ObjectCache::remove: called");
        if should_dispose {
            removed.value.dispose();
        }
        Some(removed.value)
    }

    /// Whether a live value exists for `key`
    pub fn contains(&self, key: &K) -> bool {
        lock(&self.entries)
            .map
            .get(key)
            .is_some_and(|e| !e.value.is_disposed())
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        lock(&self.entries).map.keys().cloned().collect()
    }

    /// Evict and dispose every value
    pub fn clear(&self) {
        let drained: Vec<Entry<V>> = {
            let mut entries = lock(&self.entries);
            entries.map.drain().map(|(_, entry)| entry).collect()
        };
        debug!(count = drained.len(), "ObjectCache::clear: called");
        for entry in drained {
            entry.value.dispose();
        }
    }
}
