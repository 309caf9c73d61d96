//! Keyspace: the top-level key table of the store.
//!
//! Keys map to either a byte string or a `SortedSet`. Time-to-live deadlines
//! live in an `ExpiryHeap` keyed by the entry's `EntryHandle`, so cancelling
//! or rescheduling a TTL never searches the heap. Timestamps are passed in by
//! the caller in milliseconds; the keyspace never reads a clock.

use crate::expiry_heap::ExpiryHeap;
use crate::hash_engine::{ConfigError, EntryHandle, HashConfig, HashEngine};
use crate::sorted_set::SortedSet;
use crate::worker_pool::WorkerPool;
use core::fmt;
use core::hash::BuildHasher;
use core::ops::ControlFlow;
use std::collections::hash_map::RandomState;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Sorted sets with more members than this are released off-thread.
pub const DEFAULT_LARGE_CONTAINER_SIZE: usize = 1000;
/// Most keys removed by one `expire_due` call.
pub const DEFAULT_MAX_EXPIRE_PER_SWEEP: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyspaceConfig {
    pub hash: HashConfig,
    pub large_container_size: usize,
    pub max_expire_per_sweep: usize,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            hash: HashConfig::default(),
            large_container_size: DEFAULT_LARGE_CONTAINER_SIZE,
            max_expire_per_sweep: DEFAULT_MAX_EXPIRE_PER_SWEEP,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KeyspaceError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug)]
pub enum Value {
    Str(Vec<u8>),
    ZSet(SortedSet),
}

/// Result of a TTL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    Persistent,
    Remaining(u64),
}

#[derive(Debug)]
struct Entry {
    key: Box<[u8]>,
    value: Value,
}

pub struct Keyspace<S = RandomState> {
    db: HashEngine<Entry>,
    ttl: ExpiryHeap<EntryHandle>,
    hasher: S,
    config: KeyspaceConfig,
    pool: Option<Arc<WorkerPool>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for Keyspace<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyspace")
            .field("keys", &self.db.len())
            .field("volatile", &self.ttl.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<S: BuildHasher> Keyspace<S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            db: HashEngine::new(),
            ttl: ExpiryHeap::new(),
            hasher,
            config: KeyspaceConfig::default(),
            pool: None,
        }
    }

    pub fn with_config(config: KeyspaceConfig, hasher: S) -> Result<Self, KeyspaceError> {
        Ok(Self {
            db: HashEngine::with_config(config.hash)?,
            ttl: ExpiryHeap::new(),
            hasher,
            config,
            pool: None,
        })
    }

    /// Release large values on `pool` instead of the calling thread.
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &KeyspaceConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Every key, in table order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(self.db.len());
        self.db.foreach(|_, e| {
            out.push(e.key.to_vec());
            ControlFlow::Continue(())
        });
        out
    }

    /// The value stored at `key`, whatever its type.
    pub fn value(&mut self, key: &[u8]) -> Option<&Value> {
        let (_, found) = self.locate(key);
        self.db.get(found?).map(|e| &e.value)
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<&[u8]>, KeyspaceError> {
        let (_, Some(h)) = self.locate(key) else {
            return Ok(None);
        };
        match self.db.get(h).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.as_slice())),
            Some(Value::ZSet(_)) => Err(KeyspaceError::WrongType),
        }
    }

    /// Store a string, replacing any previous value and its TTL.
    pub fn set(&mut self, key: &[u8], val: &[u8]) {
        let value = Value::Str(val.to_vec());
        match self.locate(key) {
            (_, Some(h)) => {
                self.ttl.cancel(h);
                if let Some(entry) = self.db.get_mut(h) {
                    let old = std::mem::replace(&mut entry.value, value);
                    self.release(old);
                }
            }
            (hcode, None) => {
                self.db.insert(
                    hcode,
                    Entry {
                        key: key.into(),
                        value,
                    },
                );
            }
        }
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        match self.locate(key) {
            (_, Some(h)) => {
                self.evict(h);
                true
            }
            (_, None) => false,
        }
    }

    /// Expire `key` `ttl_ms` after `now_ms`; a negative TTL makes it
    /// persistent. Returns `false` when the key does not exist.
    pub fn pexpire(&mut self, key: &[u8], ttl_ms: i64, now_ms: u64) -> bool {
        let (_, Some(h)) = self.locate(key) else {
            return false;
        };
        match u64::try_from(ttl_ms) {
            Ok(ms) => self.ttl.schedule(h, now_ms.saturating_add(ms)),
            Err(_) => {
                self.ttl.cancel(h);
            }
        }
        true
    }

    pub fn pttl(&mut self, key: &[u8], now_ms: u64) -> Ttl {
        let (_, Some(h)) = self.locate(key) else {
            return Ttl::Missing;
        };
        match self.ttl.deadline(h) {
            None => Ttl::Persistent,
            Some(deadline) => Ttl::Remaining(deadline.saturating_sub(now_ms)),
        }
    }

    /// Earliest pending deadline, for sizing the caller's poll timeout.
    pub fn next_deadline(&self) -> Option<u64> {
        self.ttl.peek().map(|item| item.val)
    }

    /// Remove keys whose deadline is at or before `now_ms`, at most
    /// `max_expire_per_sweep` of them. Returns how many were removed.
    pub fn expire_due(&mut self, now_ms: u64) -> usize {
        let mut expired = 0;
        while expired < self.config.max_expire_per_sweep {
            let Some(item) = self.ttl.pop_due(now_ms) else {
                break;
            };
            if let Some(entry) = self.db.remove(item.owner) {
                self.release(entry.value);
            }
            expired += 1;
        }
        if expired > 0 {
            debug!(expired, remaining = self.ttl.len(), "expired keys removed");
        }
        expired
    }

    /// Add or rescore `name` in the sorted set at `key`, creating the set if
    /// needed. `Ok(true)` when the member is new.
    pub fn zadd(&mut self, key: &[u8], score: f64, name: &[u8]) -> Result<bool, KeyspaceError> {
        let h = match self.locate(key) {
            (_, Some(h)) => h,
            (hcode, None) => self.db.insert(
                hcode,
                Entry {
                    key: key.into(),
                    value: Value::ZSet(SortedSet::new()),
                },
            ),
        };
        match self.db.get_mut(h).map(|e| &mut e.value) {
            Some(Value::ZSet(z)) => Ok(z.insert(name, score)),
            _ => Err(KeyspaceError::WrongType),
        }
    }

    pub fn zrem(&mut self, key: &[u8], name: &[u8]) -> Result<bool, KeyspaceError> {
        Ok(self.zset(key)?.is_some_and(|z| z.remove(name)))
    }

    pub fn zscore(&mut self, key: &[u8], name: &[u8]) -> Result<Option<f64>, KeyspaceError> {
        Ok(self.zset(key)?.and_then(|z| z.score(name)))
    }

    pub fn zrank(&mut self, key: &[u8], name: &[u8]) -> Result<Option<usize>, KeyspaceError> {
        Ok(self
            .zset(key)?
            .and_then(|z| z.lookup(name).and_then(|id| z.rank(id))))
    }

    /// Seek to `(score, name)`, move `offset` ranks, and return up to `limit`
    /// `(name, score)` pairs. A missing key yields an empty result.
    pub fn zquery(
        &mut self,
        key: &[u8],
        score: f64,
        name: &[u8],
        offset: i64,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, f64)>, KeyspaceError> {
        let Some(z) = self.zset(key)? else {
            return Ok(Vec::new());
        };
        Ok(z.range(score, name, offset, limit)
            .map(|(_, m)| (m.name().to_vec(), m.score()))
            .collect())
    }

    fn locate(&mut self, key: &[u8]) -> (u64, Option<EntryHandle>) {
        let hcode = self.hasher.hash_one(key);
        (hcode, self.db.lookup(hcode, |e| &*e.key == key))
    }

    fn zset(&mut self, key: &[u8]) -> Result<Option<&mut SortedSet>, KeyspaceError> {
        let (_, Some(h)) = self.locate(key) else {
            return Ok(None);
        };
        match self.db.get_mut(h).map(|e| &mut e.value) {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(Some(z)),
            Some(Value::Str(_)) => Err(KeyspaceError::WrongType),
        }
    }

    fn evict(&mut self, h: EntryHandle) {
        self.ttl.cancel(h);
        if let Some(entry) = self.db.remove(h) {
            self.release(entry.value);
        }
    }

    fn release(&self, value: Value) {
        match (value, &self.pool) {
            (Value::ZSet(z), Some(pool)) if z.len() > self.config.large_container_size => {
                trace!(members = z.len(), "releasing large sorted set on worker pool");
                pool.execute(move || drop(z));
            }
            _ => {}
        }
    }
}
