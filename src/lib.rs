//! Handle-based key/value caching with generation-checked slot reuse.
//!
//! This crate trades a one-time key lookup for constant-time repeat access:
//! a successful insert returns an opaque 64-bit [`Handle`] that later
//! resolves straight to the stored slot, with no hashing and no key
//! comparison on the hot path. Stale handles (the slot was erased, possibly
//! reused for another key) are rejected by a generation counter embedded in
//! the handle.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------------+
//! |     HandleCache         /      ShardedHandleCache |
//! |                               (per shard, RwLock) |
//! |  +----------------+        +-------------------+  |
//! |  |   FlatIndex    |        |     SlotStore     |  |
//! |  | key -> position| -----> | [key|value|gen|.] |  |
//! |  | (open-addressed|        | [key|value|gen|.] |  |
//! |  |  + tombstones) |        |  + freelist/bump  |  |
//! |  +----------------+        +-------------------+  |
//! +---------------------------------------------------+
//!          ^                            ^
//!          | insert / find_handle       | get / read / write / erase
//!          | (hashes the key once)      | (handle validation only)
//! ```
//!
//! Two cache types share one handle encoding, one slot layout, and one
//! index structure:
//!
//! - [`HandleCache`]: single-owner, no internal synchronisation, borrowed
//!   access via `&V` / `&mut V`.
//! - [`ShardedHandleCache`]: the keyspace partitioned over up to 256
//!   independently-locked shards; access runs as a callback under the
//!   shard's reader/writer lock.
//!
//! All capacity is fixed at construction. There is no rehash, no eviction,
//! and no implicit growth: a full cache (or full shard) refuses new keys
//! with [`Handle::NULL`]. That is deliberate — the hot path has no
//! amortised pauses.
//!
//! # Example
//!
//! ```
//! use handle_cache::{Handle, HandleCache};
//!
//! let mut cache = HandleCache::with_capacity(4);
//! let handle = cache.insert(1, 10u64, 100u64);
//!
//! // Repeat access validates the handle instead of hashing the key.
//! assert_eq!(cache.get(handle), Some(&100));
//!
//! // Erasure advances the slot's generation; the old handle is dead even
//! // after the slot is reused.
//! assert!(cache.erase(handle));
//! let reused = cache.insert(1, 10u64, 200u64);
//! assert_eq!(reused.position(), handle.position());
//! assert_ne!(reused, handle);
//! assert_eq!(cache.get(handle), None);
//! assert_eq!(cache.get(reused), Some(&200));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod handle;
mod index;
mod sharded;
mod slot;

pub use cache::HandleCache;
pub use handle::{GENERATION_BITS, Handle, MAX_GENERATION, POSITION_BITS, TYPE_BITS};
pub use sharded::{
    LOCAL_BITS, MAX_SHARD_CAPACITY, MAX_SHARDS, SHARD_BITS, ShardedHandleCache,
    ShardedHandleCacheBuilder, default_shard_count,
};
