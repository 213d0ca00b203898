//! Sharded concurrent handle cache.
//!
//! The keyspace is partitioned across up to 256 independently-locked shards,
//! each structurally identical to the single-owner cache: its own slot
//! store, its own flat index, one reader/writer lock. A handle's 32-bit
//! position field carries the routing:
//!
//! ```text
//! position layout:
//! +----------+---------------+
//! |  31..24  |     23..0     |
//! | shard_id |  local_index  |
//! |  8 bits  |    24 bits    |
//! +----------+---------------+
//! ```
//!
//! Handle-addressed operations decode the shard directly from the handle;
//! key-addressed operations route by key hash. No operation ever touches
//! more than one shard, so no lock-ordering discipline is needed. Each
//! shard is cache-line padded to keep independently-accessed shards from
//! false sharing.

use std::hash::{BuildHasher, Hash};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use ahash::RandomState;
use crossbeam_utils::CachePadded;
use log::{debug, warn};
use parking_lot::RwLock;

use crate::handle::{Handle, POSITION_BITS};
use crate::index::FlatIndex;
use crate::slot::SlotStore;

/// Number of position bits addressing the shard.
pub const SHARD_BITS: u32 = 8;

/// Number of position bits addressing a slot within its shard.
pub const LOCAL_BITS: u32 = POSITION_BITS - SHARD_BITS;

/// Maximum number of shards: the shard id must fit in 8 bits.
pub const MAX_SHARDS: usize = 1 << SHARD_BITS;

/// Maximum slots per shard: the local index must fit in 24 bits.
pub const MAX_SHARD_CAPACITY: usize = 1 << LOCAL_BITS;

const LOCAL_MASK: u32 = (1 << LOCAL_BITS) - 1;

/// Total capacity assumed when no reserve hint is given.
const DEFAULT_RESERVE: usize = 1 << 15;

/// Shard count used when none is requested: the machine's available
/// parallelism, falling back to 4 when it cannot be determined.
pub fn default_shard_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[inline]
fn encode_position(shard_id: u32, local: u32) -> u32 {
    (shard_id << LOCAL_BITS) | (local & LOCAL_MASK)
}

fn clamp_shard_count(requested: usize) -> usize {
    if requested == 0 {
        warn!("shard count 0 requested, using 1");
        return 1;
    }
    if requested > MAX_SHARDS {
        warn!("shard count {requested} exceeds {MAX_SHARDS}, clamping");
        return MAX_SHARDS;
    }
    requested
}

fn compute_per_shard_capacity(shard_count: usize, reserve_hint: usize) -> usize {
    let total = if reserve_hint == 0 {
        DEFAULT_RESERVE
    } else {
        reserve_hint
    };
    let per_shard = total.div_ceil(shard_count).max(1);
    if per_shard > MAX_SHARD_CAPACITY {
        warn!("per-shard capacity {per_shard} exceeds {MAX_SHARD_CAPACITY}, clamping");
        return MAX_SHARD_CAPACITY;
    }
    per_shard
}

/// One shard: slot store plus flat index, guarded together by the shard's
/// lock. Layout matches the single-owner cache.
struct Shard<K, V, S> {
    slots: SlotStore<K, V>,
    index: FlatIndex<K, S>,
}

/// Sharded, concurrently-accessible handle cache.
///
/// Mutation takes the target shard's exclusive lock; reads take its shared
/// lock. The callback forms [`read`](Self::read) and
/// [`write`](Self::write) run the caller's closure against the stored value
/// while the lock is held, so a reference can never escape the critical
/// section. Keep callbacks short and do not re-enter the cache from them.
///
/// # Example
///
/// ```
/// use handle_cache::ShardedHandleCache;
///
/// let cache: ShardedHandleCache<u64, u64> = ShardedHandleCache::new(8, 65_536);
/// let handle = cache.insert(1, 7, 100);
///
/// assert!(cache.add(handle, 5));
/// assert_eq!(cache.get(handle), Some(105));
///
/// assert!(cache.erase(handle));
/// assert_eq!(cache.get(handle), None);
/// ```
pub struct ShardedHandleCache<K, V, S = RandomState> {
    shards: Box<[CachePadded<RwLock<Shard<K, V, S>>>]>,
    hash_builder: S,
    per_shard_capacity: usize,
    len: AtomicUsize,
}

impl<K, V> ShardedHandleCache<K, V, RandomState>
where
    K: Hash + Eq + Clone + Default,
    V: Default,
{
    /// Create a cache with `shard_count` shards (clamped to `[1, 256]`) and
    /// a total capacity of `reserve_hint` slots split evenly across them.
    /// A zero hint defaults the total to 32768.
    pub fn new(shard_count: usize, reserve_hint: usize) -> Self {
        Self::with_hasher(shard_count, reserve_hint, RandomState::new())
    }
}

impl<K, V, S> ShardedHandleCache<K, V, S>
where
    K: Hash + Eq + Clone + Default,
    V: Default,
    S: BuildHasher + Clone,
{
    /// Create a cache with a custom hasher, used both for shard routing and
    /// within each shard's index.
    pub fn with_hasher(shard_count: usize, reserve_hint: usize, hash_builder: S) -> Self {
        let shard_count = clamp_shard_count(shard_count);
        let per_shard_capacity = compute_per_shard_capacity(shard_count, reserve_hint);
        debug!(
            "sharded handle cache created: shards={shard_count} per_shard={per_shard_capacity}"
        );
        let shards = (0..shard_count)
            .map(|_| {
                CachePadded::new(RwLock::new(Shard {
                    slots: SlotStore::with_capacity(per_shard_capacity),
                    index: FlatIndex::with_hasher(per_shard_capacity, hash_builder.clone()),
                }))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            hash_builder,
            per_shard_capacity,
            len: AtomicUsize::new(0),
        }
    }

    /// Advisory total population across all shards. Relaxed: may lag
    /// concurrent mutation by a bounded amount.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// True when the advisory population is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Fixed slot capacity of each shard.
    #[inline]
    pub fn per_shard_capacity(&self) -> usize {
        self.per_shard_capacity
    }

    /// Total slot capacity across all shards.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shards.len() * self.per_shard_capacity
    }

    /// Insert a key/value pair and return its handle. An existing key
    /// returns its current handle, value untouched. Returns
    /// [`Handle::NULL`] when the target shard is full.
    pub fn insert(&self, type_tag: u8, key: K, value: V) -> Handle {
        self.insert_impl(type_tag, key, value, false)
    }

    /// Insert or update by key. An existing entry keeps its position and
    /// generation; only the value and type tag are replaced.
    pub fn insert_or_assign(&self, type_tag: u8, key: K, value: V) -> Handle {
        self.insert_impl(type_tag, key, value, true)
    }

    fn insert_impl(&self, type_tag: u8, key: K, value: V, assign_if_exists: bool) -> Handle {
        let shard_id = self.shard_for(&key);
        let mut guard = self.shards[shard_id].write();
        let shard = &mut *guard;

        if let Some(local) = shard.index.find(&key) {
            let slot = shard.slots.slot_mut(local);
            if assign_if_exists {
                slot.value = value;
                slot.type_tag = type_tag;
            }
            return Handle::new(
                slot.type_tag,
                slot.generation,
                encode_position(shard_id as u32, local),
            );
        }

        let Some(local) = shard.slots.allocate() else {
            return Handle::NULL;
        };

        let slot = shard.slots.slot_mut(local);
        slot.key = key.clone();
        slot.value = value;
        slot.type_tag = type_tag;
        slot.occupied = true;
        let generation = slot.generation;
        if !shard.index.insert(key, local) {
            shard.slots.abandon(local);
            return Handle::NULL;
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        Handle::new(type_tag, generation, encode_position(shard_id as u32, local))
    }

    /// Read the value behind a handle under the shard's shared lock.
    ///
    /// The callback runs while the lock is held: keep it short, do not
    /// re-enter the cache, and do not try to retain the reference. Returns
    /// false (callback not invoked) when validation fails.
    pub fn read<F>(&self, handle: Handle, reader: F) -> bool
    where
        F: FnOnce(&V),
    {
        let Some((shard_id, local)) = self.decode(handle) else {
            return false;
        };
        let shard = self.shards[shard_id].read();
        let slot = shard.slots.slot(local);
        if !slot.matches(handle) {
            return false;
        }
        reader(&slot.value);
        true
    }

    /// Mutate the value behind a handle under the shard's exclusive lock.
    /// Same callback contract as [`read`](Self::read).
    pub fn write<F>(&self, handle: Handle, writer: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let Some((shard_id, local)) = self.decode(handle) else {
            return false;
        };
        let mut shard = self.shards[shard_id].write();
        let slot = shard.slots.slot_mut(local);
        if !slot.matches(handle) {
            return false;
        }
        writer(&mut slot.value);
        true
    }

    /// Copy the value behind a handle out of the critical section.
    pub fn get(&self, handle: Handle) -> Option<V>
    where
        V: Clone,
    {
        let mut out = None;
        self.read(handle, |value| out = Some(value.clone()));
        out
    }

    /// Replace the value behind a handle.
    pub fn update(&self, handle: Handle, value: V) -> bool {
        self.write(handle, |slot| *slot = value)
    }

    /// Accumulate `delta` into the value behind a handle.
    pub fn add(&self, handle: Handle, delta: V) -> bool
    where
        V: AddAssign,
    {
        self.write(handle, |slot| *slot += delta)
    }

    /// Erase by handle, advancing the slot's generation. Returns false when
    /// validation fails.
    pub fn erase(&self, handle: Handle) -> bool {
        let Some((shard_id, local)) = self.decode(handle) else {
            return false;
        };
        let mut guard = self.shards[shard_id].write();
        let shard = &mut *guard;
        if !shard.slots.slot(local).matches(handle) {
            return false;
        }
        let removed = shard.index.erase(&shard.slots.slot(local).key);
        debug_assert!(removed, "occupied slot missing from shard index");
        if !removed {
            return false;
        }
        shard.slots.release(local);
        self.len.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Look up the handle for a key, or [`Handle::NULL`] when absent.
    /// Routes to the key's shard and probes under the shared lock.
    pub fn find_handle(&self, key: &K) -> Handle {
        let shard_id = self.shard_for(key);
        let shard = self.shards[shard_id].read();
        match shard.index.find(key) {
            Some(local) => {
                let slot = shard.slots.slot(local);
                Handle::new(
                    slot.type_tag,
                    slot.generation,
                    encode_position(shard_id as u32, local),
                )
            }
            None => Handle::NULL,
        }
    }

    #[inline]
    fn shard_for(&self, key: &K) -> usize {
        (self.hash_builder.hash_one(key) % self.shards.len() as u64) as usize
    }

    /// Split a handle's position into (shard, local), bounds-checked against
    /// this cache's geometry.
    #[inline]
    fn decode(&self, handle: Handle) -> Option<(usize, u32)> {
        if handle.is_null() {
            return None;
        }
        let position = handle.position();
        let shard_id = (position >> LOCAL_BITS) as usize;
        let local = position & LOCAL_MASK;
        if shard_id >= self.shards.len() || local as usize >= self.per_shard_capacity {
            return None;
        }
        Some((shard_id, local))
    }
}

/// Builder for [`ShardedHandleCache`].
///
/// ```
/// use handle_cache::ShardedHandleCacheBuilder;
///
/// let cache = ShardedHandleCacheBuilder::new()
///     .shard_count(16)
///     .reserve_hint(1 << 16)
///     .build::<u64, u64>();
/// assert_eq!(cache.shard_count(), 16);
/// assert_eq!(cache.per_shard_capacity(), 4096);
/// ```
#[derive(Clone, Debug)]
pub struct ShardedHandleCacheBuilder {
    shard_count: Option<usize>,
    reserve_hint: usize,
}

impl Default for ShardedHandleCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedHandleCacheBuilder {
    /// Create a builder with the default shard count and reserve hint.
    pub fn new() -> Self {
        Self {
            shard_count: None,
            reserve_hint: 0,
        }
    }

    /// Set the shard count (clamped to `[1, 256]` at build time). Defaults
    /// to [`default_shard_count`].
    pub fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = Some(count);
        self
    }

    /// Set the total target capacity, split evenly across shards.
    pub fn reserve_hint(mut self, hint: usize) -> Self {
        self.reserve_hint = hint;
        self
    }

    /// Build the cache with the default hasher.
    pub fn build<K, V>(self) -> ShardedHandleCache<K, V>
    where
        K: Hash + Eq + Clone + Default,
        V: Default,
    {
        let shard_count = self.shard_count.unwrap_or_else(default_shard_count);
        ShardedHandleCache::new(shard_count, self.reserve_hint)
    }
}
