//! Single-owner handle cache.

use std::hash::{BuildHasher, Hash};

use ahash::RandomState;
use log::debug;

use crate::handle::Handle;
use crate::index::FlatIndex;
use crate::slot::SlotStore;

/// Handle-based key/value cache for one owner thread.
///
/// Insertion returns an opaque [`Handle`] that later grants constant-time
/// access to the value: no hashing and no key comparison on the read or
/// update path, only the handle validation checks (occupancy, type tag,
/// generation). Erasing advances the slot's generation, so retained handles
/// for the old entry stop validating even when the slot is reused.
///
/// Capacity is fixed at construction; there is no rehash and no growth.
/// A full cache refuses new keys with [`Handle::NULL`]. Callers needing a
/// larger working set rebuild the cache.
///
/// # Example
///
/// ```
/// use handle_cache::HandleCache;
///
/// let mut cache = HandleCache::with_capacity(1024);
/// let handle = cache.insert(1, "answer".to_string(), 42u64);
/// assert_eq!(cache.get(handle), Some(&42));
///
/// assert!(cache.erase(handle));
/// assert_eq!(cache.get(handle), None);
/// ```
pub struct HandleCache<K, V, S = RandomState> {
    slots: SlotStore<K, V>,
    index: FlatIndex<K, S>,
    len: usize,
}

impl<K, V> HandleCache<K, V, RandomState>
where
    K: Hash + Eq + Clone + Default,
    V: Default,
{
    /// Create a cache with a fixed capacity of `reserve_hint` slots
    /// (coerced to at least 1).
    pub fn with_capacity(reserve_hint: usize) -> Self {
        Self::with_capacity_and_hasher(reserve_hint, RandomState::new())
    }
}

impl<K, V, S> HandleCache<K, V, S>
where
    K: Hash + Eq + Clone + Default,
    V: Default,
    S: BuildHasher,
{
    /// Create a cache with a fixed capacity and a custom hasher.
    pub fn with_capacity_and_hasher(reserve_hint: usize, hash_builder: S) -> Self {
        let capacity = reserve_hint.max(1);
        debug!("handle cache created: capacity={capacity}");
        Self {
            slots: SlotStore::with_capacity(capacity),
            index: FlatIndex::with_hasher(capacity, hash_builder),
            len: 0,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no entries are live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fixed slot capacity chosen at construction.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Insert a key/value pair and return its handle.
    ///
    /// If the key is already present, the existing handle is returned and
    /// the stored value and type are left untouched. Returns
    /// [`Handle::NULL`] when capacity is exhausted.
    pub fn insert(&mut self, type_tag: u8, key: K, value: V) -> Handle {
        if let Some(position) = self.index.find(&key) {
            return self.build_handle(position);
        }

        let Some(position) = self.slots.allocate() else {
            return Handle::NULL;
        };

        let slot = self.slots.slot_mut(position);
        slot.key = key.clone();
        slot.value = value;
        slot.type_tag = type_tag;
        slot.occupied = true;
        if !self.index.insert(key, position) {
            self.slots.abandon(position);
            return Handle::NULL;
        }
        self.len += 1;
        self.build_handle(position)
    }

    /// Insert or update by key.
    ///
    /// An existing entry keeps its position and generation; only the value
    /// and type tag are replaced.
    pub fn insert_or_assign(&mut self, type_tag: u8, key: K, value: V) -> Handle {
        if let Some(position) = self.index.find(&key) {
            let slot = self.slots.slot_mut(position);
            slot.value = value;
            slot.type_tag = type_tag;
            return self.build_handle(position);
        }
        self.insert(type_tag, key, value)
    }

    /// Borrow the value a handle refers to, or `None` if the handle fails
    /// validation.
    #[inline]
    pub fn get(&self, handle: Handle) -> Option<&V> {
        let position = self.validate(handle)?;
        Some(&self.slots.slot(position).value)
    }

    /// Mutably borrow the value a handle refers to.
    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut V> {
        let position = self.validate(handle)?;
        Some(&mut self.slots.slot_mut(position).value)
    }

    /// Erase by handle, advancing the slot's generation so the handle (and
    /// every copy of it) stops validating. Returns false when validation
    /// fails.
    pub fn erase(&mut self, handle: Handle) -> bool {
        let Some(position) = self.validate(handle) else {
            return false;
        };
        let removed = self.index.erase(&self.slots.slot(position).key);
        debug_assert!(removed, "occupied slot missing from index");
        if !removed {
            return false;
        }
        self.slots.release(position);
        self.len -= 1;
        true
    }

    /// Look up the handle for a key, or [`Handle::NULL`] when absent.
    pub fn find_handle(&self, key: &K) -> Handle {
        match self.index.find(key) {
            Some(position) => self.build_handle(position),
            None => Handle::NULL,
        }
    }

    #[inline]
    fn build_handle(&self, position: u32) -> Handle {
        let slot = self.slots.slot(position);
        Handle::new(slot.type_tag, slot.generation, position)
    }

    /// Validation order: null, bounds, occupancy, type, generation.
    #[inline]
    fn validate(&self, handle: Handle) -> Option<u32> {
        if handle.is_null() {
            return None;
        }
        let position = handle.position();
        if position as usize >= self.slots.capacity() {
            return None;
        }
        if !self.slots.slot(position).matches(handle) {
            return None;
        }
        Some(position)
    }
}
