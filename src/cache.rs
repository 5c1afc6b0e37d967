//! Get-or-populate caches for chat metadata.
//!
//! Channel metadata and the bot's own identity are fetched from the chat
//! API the first time they are needed and then kept for the life of the
//! process. Lookups take a read lock; a miss releases it, runs the fetch,
//! and inserts the result. Two tasks missing at once both fetch and the
//! second insert overwrites the first with an equal value, so no lock is
//! ever held across an `.await`.
//!
//! [`RecentIds`] is the bounded counterpart used to recognise event
//! deliveries that were already accepted.

use anyhow::Result;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A string-keyed cache, e.g. channel id → channel metadata.
pub struct KeyedCache<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V: Clone> KeyedCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        read(&self.entries).get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: V) {
        write(&self.entries).insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached value for `key`, or the result of `fetch` (cached on success).
    pub async fn get_or_try_populate<F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}

impl<V: Clone> Default for KeyedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single lazily populated value, e.g. the bot's identity.
pub struct OnceCache<V> {
    value: RwLock<Option<V>>,
}

impl<V: Clone> OnceCache<V> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }

    pub fn get(&self) -> Option<V> {
        read(&self.value).clone()
    }

    pub async fn get_or_try_populate<F, Fut>(&self, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let value = fetch().await?;
        *write(&self.value) = Some(value.clone());
        Ok(value)
    }
}

impl<V: Clone> Default for OnceCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The most recent `capacity` ids seen, oldest evicted first.
pub struct RecentIds {
    capacity: usize,
    inner: Mutex<RecentInner>,
}

#[derive(Default)]
struct RecentInner {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RecentInner::default()),
        }
    }

    /// Record `id`. Returns `false` if it is still among the recent ids.
    pub fn first_sighting(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.ids.contains(id) {
            return false;
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.ids.remove(&oldest);
            }
        }
        inner.ids.insert(id.to_string());
        inner.order.push_back(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A panic while holding the lock cannot leave a half-written entry.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
