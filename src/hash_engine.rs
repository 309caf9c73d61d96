//! HashEngine: chained hash table with progressive rehashing.
//!
//! Entries live in a slot arena and are chained through `next` handles, so
//! moving a chain head from one table to another only relinks handles; the
//! entry itself never moves and its `EntryHandle` stays valid.
//!
//! Growth never stops the world. When the newer table reaches its load limit
//! it becomes the older table and a table of twice the capacity takes its
//! place. Every mutating call then migrates at most `rehash_quota` entries
//! from older to newer until older is empty and dropped.

use core::fmt;
use core::ops::ControlFlow;
use slotmap::{new_key_type, SlotMap};
use thiserror::Error;
use tracing::debug;

new_key_type! {
    /// Stable, generational handle to an entry stored in a `HashEngine`.
    pub struct EntryHandle;
}

pub const DEFAULT_INITIAL_CAPACITY: usize = 4;
pub const DEFAULT_MAX_LOAD_FACTOR: usize = 8;
pub const DEFAULT_REHASH_QUOTA: usize = 128;

/// Sizing and migration knobs for a `HashEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashConfig {
    /// Bucket count of the first table; must be a power of two.
    pub initial_capacity: usize,
    /// Average chain length that triggers a doubling rehash.
    pub max_load_factor: usize,
    /// Entries migrated per mutating call while a rehash is in progress.
    pub rehash_quota: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            rehash_quota: DEFAULT_REHASH_QUOTA,
        }
    }
}

impl HashConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.initial_capacity.is_power_of_two() {
            return Err(ConfigError::CapacityNotPowerOfTwo(self.initial_capacity));
        }
        if self.max_load_factor == 0 {
            return Err(ConfigError::ZeroLoadFactor);
        }
        if self.rehash_quota == 0 {
            return Err(ConfigError::ZeroRehashQuota);
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("initial capacity must be a non-zero power of two, got {0}")]
    CapacityNotPowerOfTwo(usize),
    #[error("max load factor must be at least 1")]
    ZeroLoadFactor,
    #[error("rehash quota must be at least 1")]
    ZeroRehashQuota,
}

#[derive(Debug)]
struct Slot<T> {
    hcode: u64,
    next: Option<EntryHandle>,
    value: T,
}

type Slots<T> = SlotMap<EntryHandle, Slot<T>>;

/// Position of a matched entry inside its chain.
#[derive(Clone, Copy)]
enum Link {
    Head(usize),
    After(EntryHandle),
}

struct Table {
    buckets: Box<[Option<EntryHandle>]>,
    mask: usize,
    size: usize,
}

impl Table {
    fn with_capacity(n: usize) -> Self {
        assert!(
            n.is_power_of_two(),
            "hash table capacity must be a power of two, got {n}"
        );
        Self {
            buckets: vec![None; n].into_boxed_slice(),
            mask: n - 1,
            size: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn bucket(&self, hcode: u64) -> usize {
        (hcode as usize) & self.mask
    }

    fn push_front<T>(&mut self, slots: &mut Slots<T>, h: EntryHandle) {
        let pos = self.bucket(slots[h].hcode);
        slots[h].next = self.buckets[pos];
        self.buckets[pos] = Some(h);
        self.size += 1;
    }

    fn find<T, F>(&self, slots: &Slots<T>, hcode: u64, mut eq: F) -> Option<(Link, EntryHandle)>
    where
        F: FnMut(EntryHandle, &T) -> bool,
    {
        let pos = self.bucket(hcode);
        let mut link = Link::Head(pos);
        let mut cur = self.buckets[pos];
        while let Some(h) = cur {
            let slot = &slots[h];
            if slot.hcode == hcode && eq(h, &slot.value) {
                return Some((link, h));
            }
            link = Link::After(h);
            cur = slot.next;
        }
        None
    }

    fn unlink<T>(&mut self, slots: &mut Slots<T>, link: Link, h: EntryHandle) {
        let next = slots[h].next.take();
        match link {
            Link::Head(pos) => self.buckets[pos] = next,
            Link::After(prev) => slots[prev].next = next,
        }
        self.size -= 1;
    }

    fn visit<T, F>(&self, slots: &Slots<T>, f: &mut F) -> ControlFlow<()>
    where
        F: FnMut(EntryHandle, &T) -> ControlFlow<()>,
    {
        for head in self.buckets.iter() {
            let mut cur = *head;
            while let Some(h) = cur {
                let slot = &slots[h];
                if f(h, &slot.value).is_break() {
                    return ControlFlow::Break(());
                }
                cur = slot.next;
            }
        }
        ControlFlow::Continue(())
    }
}

/// Chained hash table over records of type `T`.
///
/// The engine never hashes or compares records itself: callers pass the
/// precomputed hash code on insert, and an equality predicate alongside the
/// hash code on lookup and delete.
pub struct HashEngine<T> {
    slots: Slots<T>,
    newer: Option<Table>,
    older: Option<Table>,
    migrate_pos: usize,
    config: HashConfig,
}

/// Iterator over the entries of a `HashEngine`, in arena order.
pub struct Iter<'a, T> {
    it: slotmap::basic::Iter<'a, EntryHandle, Slot<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (EntryHandle, &'a T);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|(h, s)| (h, &s.value))
    }
}

impl<T> Default for HashEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HashEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashEngine")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("rehashing", &self.is_rehashing())
            .finish()
    }
}

impl<T> HashEngine<T> {
    pub fn new() -> Self {
        Self::build(HashConfig::default())
    }

    pub fn with_config(config: HashConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: HashConfig) -> Self {
        Self {
            slots: SlotMap::with_key(),
            newer: None,
            older: None,
            migrate_pos: 0,
            config,
        }
    }

    pub fn config(&self) -> &HashConfig {
        &self.config
    }

    /// Number of live entries across both tables.
    pub fn len(&self) -> usize {
        let n = self.newer.as_ref().map_or(0, |t| t.size) + self.older.as_ref().map_or(0, |t| t.size);
        debug_assert_eq!(n, self.slots.len());
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket count of the newer table (0 before the first insert).
    pub fn capacity(&self) -> usize {
        self.newer.as_ref().map_or(0, Table::capacity)
    }

    pub fn is_rehashing(&self) -> bool {
        self.older.is_some()
    }

    /// Find the entry with `hcode` for which `eq` holds.
    pub fn lookup<F>(&mut self, hcode: u64, mut eq: F) -> Option<EntryHandle>
    where
        F: FnMut(&T) -> bool,
    {
        self.help_rehashing();
        [self.newer.as_ref(), self.older.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|t| t.find(&self.slots, hcode, |_, v| eq(v)))
            .map(|(_, h)| h)
    }

    /// Insert `value` under `hcode`. Duplicates are not detected; callers
    /// look up first when keys must be unique.
    pub fn insert(&mut self, hcode: u64, value: T) -> EntryHandle {
        let h = self.slots.insert(Slot {
            hcode,
            next: None,
            value,
        });
        let initial = self.config.initial_capacity;
        let newer = self
            .newer
            .get_or_insert_with(|| Table::with_capacity(initial));
        newer.push_front(&mut self.slots, h);
        let full = newer.size >= newer.capacity().saturating_mul(self.config.max_load_factor);
        if self.older.is_none() && full {
            self.trigger_rehashing();
        }
        self.help_rehashing();
        h
    }

    /// Detach and return the entry with `hcode` for which `eq` holds.
    pub fn delete<F>(&mut self, hcode: u64, mut eq: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.help_rehashing();
        self.detach(hcode, |_, v| eq(v))
    }

    /// Detach and return the entry behind `handle`; `None` if it is stale.
    pub fn remove(&mut self, handle: EntryHandle) -> Option<T> {
        let hcode = self.slots.get(handle)?.hcode;
        self.help_rehashing();
        self.detach(hcode, |h, _| h == handle)
    }

    pub fn get(&self, handle: EntryHandle) -> Option<&T> {
        self.slots.get(handle).map(|s| &s.value)
    }

    pub fn get_mut(&mut self, handle: EntryHandle) -> Option<&mut T> {
        self.slots.get_mut(handle).map(|s| &mut s.value)
    }

    pub fn hash_code(&self, handle: EntryHandle) -> Option<u64> {
        self.slots.get(handle).map(|s| s.hcode)
    }

    /// Visit every entry, newer table first. The visitor stops enumeration
    /// by returning `ControlFlow::Break`; the result is `true` when every
    /// entry was visited.
    pub fn foreach<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(EntryHandle, &T) -> ControlFlow<()>,
    {
        [self.newer.as_ref(), self.older.as_ref()]
            .into_iter()
            .flatten()
            .all(|t| t.visit(&self.slots, &mut visitor).is_continue())
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            it: self.slots.iter(),
        }
    }

    /// Drop every entry and both tables.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.newer = None;
        self.older = None;
        self.migrate_pos = 0;
    }

    fn detach<F>(&mut self, hcode: u64, mut eq: F) -> Option<T>
    where
        F: FnMut(EntryHandle, &T) -> bool,
    {
        for table in [self.newer.as_mut(), self.older.as_mut()].into_iter().flatten() {
            if let Some((link, h)) = table.find(&self.slots, hcode, &mut eq) {
                table.unlink(&mut self.slots, link, h);
                return self.slots.remove(h).map(|s| s.value);
            }
        }
        None
    }

    fn trigger_rehashing(&mut self) {
        debug_assert!(self.older.is_none(), "rehash already in progress");
        let older = self
            .newer
            .take()
            .expect("newer table must exist when it overflows");
        let capacity = older
            .capacity()
            .checked_mul(2)
            .expect("hash table capacity overflow");
        debug!(
            from = older.capacity(),
            to = capacity,
            entries = older.size,
            "hash table rehash started"
        );
        self.newer = Some(Table::with_capacity(capacity));
        self.older = Some(older);
        self.migrate_pos = 0;
    }

    fn help_rehashing(&mut self) {
        let Some(older) = self.older.as_mut() else {
            return;
        };
        let newer = self
            .newer
            .as_mut()
            .expect("newer table must exist while rehashing");
        let mut moved = 0;
        while moved < self.config.rehash_quota && older.size > 0 {
            match older.buckets[self.migrate_pos] {
                None => self.migrate_pos += 1,
                Some(h) => {
                    older.unlink(&mut self.slots, Link::Head(self.migrate_pos), h);
                    newer.push_front(&mut self.slots, h);
                    moved += 1;
                }
            }
        }
        if older.size == 0 {
            debug!(
                capacity = newer.capacity(),
                entries = newer.size,
                "hash table rehash finished"
            );
            self.older = None;
            self.migrate_pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::BTreeSet;
    use std::hash::{Hash, Hasher};

    fn hcode(s: &str) -> u64 {
        let mut h = DefaultHasher::new();
        s.hash(&mut h);
        h.finish()
    }

    fn put(m: &mut HashEngine<String>, s: &str) -> EntryHandle {
        m.insert(hcode(s), s.to_string())
    }

    fn find(m: &mut HashEngine<String>, s: &str) -> Option<EntryHandle> {
        m.lookup(hcode(s), |v| v == s)
    }

    fn slow_config() -> HashConfig {
        HashConfig {
            rehash_quota: 1,
            ..HashConfig::default()
        }
    }

    /// Invariant: An inserted entry is found by lookup until it is deleted;
    /// absent keys are reported as `None`.
    #[test]
    fn insert_lookup_delete() {
        let mut m = HashEngine::new();
        assert!(find(&mut m, "a").is_none());
        let h = put(&mut m, "a");
        put(&mut m, "b");
        assert_eq!(find(&mut m, "a"), Some(h));
        assert_eq!(m.get(h).map(String::as_str), Some("a"));
        assert_eq!(m.len(), 2);

        assert_eq!(m.delete(hcode("a"), |v| v == "a"), Some("a".to_string()));
        assert!(find(&mut m, "a").is_none());
        assert!(m.get(h).is_none(), "stale handle must not resolve");
        assert_eq!(m.delete(hcode("a"), |v| v == "a"), None);
        assert_eq!(m.len(), 1);
    }

    /// Invariant: Tables are allocated lazily; the first insert creates a
    /// table of the configured initial capacity.
    #[test]
    fn table_created_on_first_insert() {
        let mut m: HashEngine<String> = HashEngine::new();
        assert_eq!(m.capacity(), 0);
        assert!(m.is_empty());
        put(&mut m, "x");
        assert_eq!(m.capacity(), DEFAULT_INITIAL_CAPACITY);
    }

    /// Invariant: Reaching `capacity * max_load_factor` entries swaps in a
    /// table of double capacity; with a quota of 1 the older table drains one
    /// entry per mutating call and is then dropped.
    #[test]
    fn rehash_triggers_at_load_factor_and_drains_incrementally() {
        let mut m = HashEngine::with_config(slow_config()).unwrap();
        let threshold = DEFAULT_INITIAL_CAPACITY * DEFAULT_MAX_LOAD_FACTOR;
        let keys: Vec<String> = (0..threshold).map(|i| format!("k{i}")).collect();
        for k in &keys[..threshold - 1] {
            put(&mut m, k);
            assert!(!m.is_rehashing());
        }
        put(&mut m, &keys[threshold - 1]);
        assert!(m.is_rehashing());
        assert_eq!(m.capacity(), DEFAULT_INITIAL_CAPACITY * 2);

        // One entry moved by the triggering insert; the rest need one call each.
        let mut calls = 0;
        while m.is_rehashing() {
            for k in &keys {
                assert!(find(&mut m, k).is_some(), "{k} lost during rehash");
                calls += 1;
                if !m.is_rehashing() {
                    break;
                }
            }
        }
        assert_eq!(calls, threshold - 1);
        assert_eq!(m.len(), threshold);
        for k in &keys {
            assert!(find(&mut m, k).is_some());
        }
    }

    /// Invariant: With the default quota the older table never outlives the
    /// call that created it for small tables.
    #[test]
    fn default_quota_finishes_small_rehash_in_one_call() {
        let mut m = HashEngine::new();
        for i in 0..1000 {
            put(&mut m, &format!("k{i}"));
            assert!(!m.is_rehashing() || m.len() > DEFAULT_REHASH_QUOTA);
        }
        assert_eq!(m.len(), 1000);
        assert!(m.capacity().is_power_of_two());
    }

    /// Invariant: Deleting entries that still live in the older table works
    /// while migration is in progress, and `len` stays exact.
    #[test]
    fn delete_during_rehash_reaches_older_table() {
        let mut m = HashEngine::with_config(slow_config()).unwrap();
        let n = DEFAULT_INITIAL_CAPACITY * DEFAULT_MAX_LOAD_FACTOR;
        for i in 0..n {
            put(&mut m, &format!("k{i}"));
        }
        assert!(m.is_rehashing());
        let mut expected = n;
        for i in (0..n).step_by(2) {
            let k = format!("k{i}");
            assert_eq!(m.delete(hcode(&k), |v| *v == k), Some(k.clone()));
            expected -= 1;
            assert_eq!(m.len(), expected);
        }
        for i in 0..n {
            let k = format!("k{i}");
            assert_eq!(find(&mut m, &k).is_some(), i % 2 == 1);
        }
    }

    /// Invariant: Removal by handle detaches exactly that entry, even when
    /// other entries share its hash code and compare equal.
    #[test]
    fn remove_by_handle_under_collisions() {
        let mut m = HashEngine::new();
        let a = m.insert(7, "same".to_string());
        let b = m.insert(7, "same".to_string());
        let c = m.insert(7, "other".to_string());
        assert_ne!(a, b);
        assert_eq!(m.remove(a), Some("same".to_string()));
        assert!(m.get(a).is_none());
        assert_eq!(m.get(b).map(String::as_str), Some("same"));
        assert_eq!(m.lookup(7, |v| v == "other"), Some(c));
        assert_eq!(m.remove(a), None);
        assert_eq!(m.len(), 2);
    }

    /// Invariant: Entries are inserted at the head of their chain, so the
    /// most recent of several equal records is found first.
    #[test]
    fn most_recent_insert_wins_lookup() {
        let mut m = HashEngine::new();
        let _old = m.insert(1, "k".to_string());
        let new = m.insert(1, "k".to_string());
        assert_eq!(m.lookup(1, |v| v == "k"), Some(new));
    }

    /// Invariant: `foreach` visits every entry exactly once when the visitor
    /// never stops, across both tables during a rehash.
    #[test]
    fn foreach_visits_everything_during_rehash() {
        let mut m = HashEngine::with_config(slow_config()).unwrap();
        let n = DEFAULT_INITIAL_CAPACITY * DEFAULT_MAX_LOAD_FACTOR + 5;
        for i in 0..n {
            put(&mut m, &format!("k{i}"));
        }
        assert!(m.is_rehashing());
        let mut seen = BTreeSet::new();
        let done = m.foreach(|_, v| {
            assert!(seen.insert(v.clone()), "visited twice: {v}");
            ControlFlow::Continue(())
        });
        assert!(done);
        assert_eq!(seen.len(), n);

        let from_iter: BTreeSet<String> = m.iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(from_iter, seen);
    }

    /// Invariant: A visitor that breaks halts enumeration immediately and the
    /// result reports the early stop.
    #[test]
    fn foreach_stops_early() {
        let mut m = HashEngine::new();
        for i in 0..20 {
            put(&mut m, &format!("k{i}"));
        }
        let mut visited = 0;
        let done = m.foreach(|_, _| {
            visited += 1;
            if visited == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(!done);
        assert_eq!(visited, 3);
    }

    /// Invariant: `clear` drops all entries and tables; the engine is reusable.
    #[test]
    fn clear_resets_engine() {
        let mut m = HashEngine::with_config(slow_config()).unwrap();
        let handles: Vec<_> = (0..40).map(|i| put(&mut m, &format!("k{i}"))).collect();
        m.clear();
        assert!(m.is_empty());
        assert!(!m.is_rehashing());
        assert_eq!(m.capacity(), 0);
        assert!(handles.iter().all(|h| m.get(*h).is_none()));
        put(&mut m, "again");
        assert!(find(&mut m, "again").is_some());
    }

    /// Invariant: Invalid configurations are rejected with a typed error.
    #[test]
    fn config_validation() {
        let bad_cap = HashConfig {
            initial_capacity: 6,
            ..HashConfig::default()
        };
        assert_eq!(
            HashEngine::<u32>::with_config(bad_cap).unwrap_err(),
            ConfigError::CapacityNotPowerOfTwo(6)
        );
        let zero_cap = HashConfig {
            initial_capacity: 0,
            ..HashConfig::default()
        };
        assert!(zero_cap.validate().is_err());
        let zero_load = HashConfig {
            max_load_factor: 0,
            ..HashConfig::default()
        };
        assert_eq!(zero_load.validate(), Err(ConfigError::ZeroLoadFactor));
        let zero_quota = HashConfig {
            rehash_quota: 0,
            ..HashConfig::default()
        };
        assert_eq!(zero_quota.validate(), Err(ConfigError::ZeroRehashQuota));
        assert!(HashConfig::default().validate().is_ok());
    }

    /// Invariant: Allocating a table with a non power-of-two capacity is a
    /// programmer error and panics.
    #[test]
    #[should_panic(expected = "power of two")]
    fn table_rejects_non_power_of_two() {
        let _ = Table::with_capacity(12);
    }

    /// Invariant: `get_mut` edits records in place without disturbing the
    /// index; the stored hash code is unchanged.
    #[test]
    fn get_mut_edits_in_place() {
        let mut m = HashEngine::new();
        let h = m.insert(hcode("a"), ("a".to_string(), 1));
        m.get_mut(h).unwrap().1 = 5;
        assert_eq!(m.hash_code(h), Some(hcode("a")));
        let found = m.lookup(hcode("a"), |(k, _)| k == "a").unwrap();
        assert_eq!(m.get(found).map(|(_, v)| *v), Some(5));
    }
}
