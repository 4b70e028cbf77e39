//! In-Memory Store
//!
//! A thread-safe, sharded item map that implements every handler capability.
//! The binary serves it, and tests and benchmarks use it as a realistic
//! handler.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are distributed across shards by hash, so different keys can be read
//! and written in parallel.
//!
//! ## Item Statistics
//!
//! Once the server pushes its registry (see [`StatsHandler`]), every
//! operation publishes its effect on `curr_items`, `total_items`, `bytes`
//! and `expired_unfetched`. Before that, only the local counts move.

use crate::handler::{Deleter, Getter, HandlerError, RequestHandler, Setter, StatsHandler};
use crate::protocol::{Item, Response};
use crate::stats::{names, StatsRegistry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Number of shards.
const NUM_SHARDS: usize = 64;

/// A stored item plus whether any `get` has returned it yet.
#[derive(Debug)]
struct Entry {
    item: Item,
    fetched: AtomicBool,
}

impl Entry {
    fn new(item: Item) -> Self {
        Self {
            item,
            fetched: AtomicBool::new(false),
        }
    }

    /// Bytes accounted for this entry (key plus value).
    fn size(&self) -> i64 {
        item_size(&self.item)
    }

    fn was_fetched(&self) -> bool {
        self.fetched.load(Ordering::Relaxed)
    }
}

fn item_size(item: &Item) -> i64 {
    (item.key.len() + item.value.len()) as i64
}

/// How one operation moved the item statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ItemDelta {
    /// Change in live items (`curr_items`)
    pub items: i64,
    /// Change in stored bytes (`bytes`)
    pub bytes: i64,
    /// Items stored (`total_items`)
    pub stored: i64,
    /// Items that expired without ever being fetched (`expired_unfetched`)
    pub expired_unfetched: i64,
}

impl ItemDelta {
    fn removed(entry: &Entry, expired: bool) -> Self {
        Self {
            items: -1,
            bytes: -entry.size(),
            stored: 0,
            expired_unfetched: (expired && !entry.was_fetched()) as i64,
        }
    }

    fn merge(&mut self, other: ItemDelta) {
        self.items += other.items;
        self.bytes += other.bytes;
        self.stored += other.stored;
        self.expired_unfetched += other.expired_unfetched;
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single shard containing a portion of the items.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<String, Entry>>,
}

/// The reference store.
///
/// # Example
///
/// ```
/// use mcwire::protocol::Item;
/// use mcwire::storage::MemoryStore;
///
/// let store = MemoryStore::new();
/// store.insert(Item::new("name", 0, "Ariz"));
///
/// let (item, _) = store.lookup("name");
/// assert_eq!(item.unwrap().value, "Ariz");
/// ```
pub struct MemoryStore {
    shards: Vec<Shard>,

    /// Live item count (approximate while writers race)
    item_count: AtomicI64,

    /// Stored bytes
    byte_count: AtomicI64,

    /// Registry pushed by the server
    registry: OnceLock<Arc<StatsRegistry>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("shards", &self.shards.len())
            .field("items", &self.len())
            .field("bytes", &self.size_bytes())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            item_count: AtomicI64::new(0),
            byte_count: AtomicI64::new(0),
            registry: OnceLock::new(),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Stores `item`, replacing any previous item under the same key.
    pub fn insert(&self, item: Item) -> ItemDelta {
        let now = SystemTime::now();
        let mut delta = ItemDelta {
            items: 1,
            bytes: item_size(&item),
            stored: 1,
            expired_unfetched: 0,
        };

        let shard = self.shard(&item.key);
        let mut data = shard.data.write().unwrap();
        if let Some(previous) = data.insert(item.key.clone(), Entry::new(item)) {
            delta.merge(ItemDelta::removed(
                &previous,
                previous.item.is_expired_at(now),
            ));
        }
        drop(data);

        self.apply_local(delta);
        delta
    }

    /// Looks up `key`, dropping it if it has expired.
    pub fn lookup(&self, key: &str) -> (Option<Item>, ItemDelta) {
        let shard = self.shard(key);
        let now = SystemTime::now();

        // Fast path under the read lock
        {
            let data = shard.data.read().unwrap();
            match data.get(key) {
                None => return (None, ItemDelta::default()),
                Some(entry) if !entry.item.is_expired_at(now) => {
                    entry.fetched.store(true, Ordering::Relaxed);
                    return (Some(entry.item.clone()), ItemDelta::default());
                }
                Some(_) => {}
            }
        }

        // Expired: take the write lock to remove it
        let mut data = shard.data.write().unwrap();
        let expired = data
            .get(key)
            .map(|entry| entry.item.is_expired_at(now))
            .unwrap_or(false);

        if !expired {
            // Replaced by another writer in between
            let item = data.get(key).map(|entry| {
                entry.fetched.store(true, Ordering::Relaxed);
                entry.item.clone()
            });
            return (item, ItemDelta::default());
        }

        let delta = data
            .remove(key)
            .map(|entry| ItemDelta::removed(&entry, true))
            .unwrap_or_default();
        drop(data);

        self.apply_local(delta);
        (None, delta)
    }

    /// Removes `key`. Returns whether a live item was removed.
    pub fn remove(&self, key: &str) -> (bool, ItemDelta) {
        let shard = self.shard(key);
        let now = SystemTime::now();

        let removed = shard.data.write().unwrap().remove(key);
        let Some(entry) = removed else {
            return (false, ItemDelta::default());
        };

        let expired = entry.item.is_expired_at(now);
        let delta = ItemDelta::removed(&entry, expired);
        self.apply_local(delta);
        (!expired, delta)
    }

    /// Removes every expired item from all shards.
    ///
    /// Called by the background [`ExpirySweeper`](super::ExpirySweeper).
    pub fn cleanup_expired(&self) -> ItemDelta {
        let now = SystemTime::now();
        let mut delta = ItemDelta::default();

        for shard in &self.shards {
            let mut data = shard.data.write().unwrap();
            data.retain(|_, entry| {
                if entry.item.is_expired_at(now) {
                    delta.merge(ItemDelta::removed(entry, true));
                    false
                } else {
                    true
                }
            });
        }

        self.apply_local(delta);
        delta
    }

    /// Number of items held, expired ones included until they are noticed.
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed).max(0) as usize
    }

    /// Returns true if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored key and value bytes.
    pub fn size_bytes(&self) -> i64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    /// The registry pushed by the server, if any.
    pub fn registry(&self) -> Option<&Arc<StatsRegistry>> {
        self.registry.get()
    }

    fn apply_local(&self, delta: ItemDelta) {
        if delta.items != 0 {
            self.item_count.fetch_add(delta.items, Ordering::Relaxed);
        }
        if delta.bytes != 0 {
            self.byte_count.fetch_add(delta.bytes, Ordering::Relaxed);
        }
    }

    /// Publishes `delta` to the pushed registry.
    pub async fn publish(&self, delta: ItemDelta) {
        let Some(registry) = self.registry.get() else {
            return;
        };
        if delta.is_empty() {
            return;
        }

        for (name, n) in [
            (names::CURR_ITEMS, delta.items),
            (names::BYTES, delta.bytes),
            (names::TOTAL_ITEMS, delta.stored),
            (names::EXPIRED_UNFETCHED, delta.expired_unfetched),
        ] {
            if n != 0 {
                registry.increment(name, n).await;
            }
        }
    }
}

#[async_trait]
impl Getter for MemoryStore {
    async fn get(&self, _cancel: &CancellationToken, key: &str) -> Option<Response> {
        let (item, delta) = self.lookup(key);
        self.publish(delta).await;
        item.map(Response::item)
    }
}

#[async_trait]
impl Setter for MemoryStore {
    async fn set(&self, _cancel: &CancellationToken, item: Item) -> Option<Response> {
        let delta = self.insert(item);
        self.publish(delta).await;
        None
    }
}

#[async_trait]
impl Deleter for MemoryStore {
    async fn delete(&self, _cancel: &CancellationToken, key: &str) -> Result<(), HandlerError> {
        let (removed, delta) = self.remove(key);
        self.publish(delta).await;
        if removed {
            Ok(())
        } else {
            Err(HandlerError::NotFound)
        }
    }
}

impl StatsHandler for MemoryStore {
    fn stats(&self, registry: Arc<StatsRegistry>) {
        if self.registry.set(registry).is_err() {
            debug!("Statistics registry already set, keeping the first one");
        }
    }
}

impl RequestHandler for MemoryStore {
    fn as_getter(&self) -> Option<&dyn Getter> {
        Some(self)
    }

    fn as_setter(&self) -> Option<&dyn Setter> {
        Some(self)
    }

    fn as_deleter(&self) -> Option<&dyn Deleter> {
        Some(self)
    }

    fn as_stats_handler(&self) -> Option<&dyn StatsHandler> {
        Some(self)
    }
}
