//! kvcore: the in-memory data engine of a Redis-style key-value store.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: build the keyspace from small structures that can each be
//!   reasoned about and tested on their own.
//! - Layers:
//!   - HashEngine<T>: chained hash table that grows by progressive
//!     rehashing. It stores records and precomputed hash codes; callers
//!     supply equality as a closure, so the engine never inspects `T`.
//!   - OrderTree<T>: AVL tree with subtree counts for rank and offset
//!     queries. Callers supply the ordering as a closure on each mutating
//!     call.
//!   - ExpiryHeap<K>: binary min-heap that reports every element move back
//!     to the element's owner.
//!   - SortedSet: members stored once in an OrderTree, indexed by name in
//!     a HashEngine.
//!   - Keyspace: strings and sorted sets under byte-string keys, TTLs in an
//!     ExpiryHeap, large values released on a WorkerPool.
//!
//! Constraints
//! - No intrusive pointers. Entries and nodes live in `slotmap` arenas and
//!   link to each other through generational keys; a stale key resolves to
//!   `None` instead of to a reused slot.
//! - Identities are stable: an `EntryHandle` survives table migration and a
//!   `NodeId` survives rebalancing, including two-children deletions where
//!   the successor takes over the deleted node's links.
//! - Bounded pauses: a rehash moves at most `rehash_quota` entries per
//!   mutating call; an expiry sweep removes at most `max_expire_per_sweep`
//!   keys.
//! - Not internally synchronized: mutation takes `&mut self`. Only the
//!   WorkerPool is shared between threads.
//!
//! Hashing
//! - Keys and member names are hashed once with the configured
//!   `BuildHasher`, std's randomly seeded `RandomState` unless overridden,
//!   so clients cannot precompute keys that share a chain. The code is
//!   stored with the entry and reused during rehashing.
//!
//! Ordering
//! - Sorted-set members order by `(score, name)`: scores by
//!   `f64::total_cmp`, names byte-wise. `seek_ge` is inclusive on the full
//!   pair.
//!
//! Notes and non-goals
//! - No wire protocol, event loop, persistence or replication.
//! - Time is passed in by the caller (`now_ms`); nothing here reads a clock.

pub mod expiry_heap;
mod expiry_heap_proptest;
pub mod hash_engine;
mod hash_engine_proptest;
pub mod keyspace;
pub mod order_tree;
mod order_tree_proptest;
pub mod sorted_set;
mod sorted_set_proptest;
pub mod worker_pool;

// Public surface
pub use expiry_heap::{ExpiryHeap, HeapItem};
pub use hash_engine::{ConfigError, EntryHandle, HashConfig, HashEngine};
pub use keyspace::{Keyspace, KeyspaceConfig, KeyspaceError, Ttl, Value};
pub use order_tree::{NodeId, OrderTree};
pub use sorted_set::{Member, MemberId, SortedSet};
pub use worker_pool::{PoolError, WorkerPool};
