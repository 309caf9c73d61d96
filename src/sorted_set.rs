//! SortedSet: members indexed by name and ordered by `(score, name)`.
//!
//! Each member is stored once, as the value of an `OrderTree` node. The
//! `HashEngine` index holds only the node's `MemberId`, so a name lookup and
//! an ordered walk address the same slot and a score change never touches
//! the index.

use crate::hash_engine::{ConfigError, HashConfig, HashEngine};
use crate::order_tree::{NodeId, OrderTree};
use core::cmp::Ordering;
use core::fmt;
use core::hash::BuildHasher;
use std::collections::hash_map::RandomState;

/// Id of a member inside its `SortedSet`. Valid until the member is deleted.
pub type MemberId = NodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    name: Box<[u8]>,
    score: f64,
}

impl Member {
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

/// Position of a member relative to the query `(score, name)`.
fn cmp_key(m: &Member, score: f64, name: &[u8]) -> Ordering {
    m.score
        .total_cmp(&score)
        .then_with(|| (*m.name).cmp(name))
}

fn by_score_then_name(a: &Member, b: &Member) -> Ordering {
    cmp_key(a, b.score, &b.name)
}

pub struct SortedSet<S = RandomState> {
    tree: OrderTree<Member>,
    index: HashEngine<MemberId>,
    hasher: S,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl Default for SortedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for SortedSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedSet")
            .field("len", &self.tree.len())
            .field("index", &self.index)
            .finish()
    }
}

impl<S: BuildHasher> SortedSet<S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            tree: OrderTree::new(),
            index: HashEngine::new(),
            hasher,
        }
    }

    pub fn with_config(config: HashConfig, hasher: S) -> Result<Self, ConfigError> {
        Ok(Self {
            tree: OrderTree::new(),
            index: HashEngine::with_config(config)?,
            hasher,
        })
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.tree.len(), self.index.len());
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Add `name` with `score`, or move an existing member to `score`.
    /// Returns `true` only when a new member was created.
    pub fn insert(&mut self, name: &[u8], score: f64) -> bool {
        let hcode = self.hasher.hash_one(name);
        if let Some(id) = self.find(hcode, name) {
            let unchanged = self
                .tree
                .get(id)
                .is_some_and(|m| m.score.total_cmp(&score) == Ordering::Equal);
            if !unchanged {
                self.tree
                    .update_by(id, |m| m.score = score, by_score_then_name);
            }
            return false;
        }
        let member = Member {
            name: name.into(),
            score,
        };
        let id = self.tree.insert_by(member, by_score_then_name);
        self.index.insert(hcode, id);
        true
    }

    /// Find a member by name; the ordered structure is not consulted.
    pub fn lookup(&mut self, name: &[u8]) -> Option<MemberId> {
        let hcode = self.hasher.hash_one(name);
        self.find(hcode, name)
    }

    pub fn get(&self, id: MemberId) -> Option<&Member> {
        self.tree.get(id)
    }

    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        let id = self.lookup(name)?;
        self.tree.get(id).map(Member::score)
    }

    /// Remove a member from both the index and the ordering.
    pub fn delete(&mut self, id: MemberId) -> Option<Member> {
        let hcode = self.hasher.hash_one(self.tree.get(id)?.name());
        let unindexed = self.index.delete(hcode, |i| *i == id);
        debug_assert_eq!(unindexed, Some(id), "member missing from name index");
        self.tree.remove(id)
    }

    pub fn remove(&mut self, name: &[u8]) -> bool {
        self.lookup(name).and_then(|id| self.delete(id)).is_some()
    }

    /// First member with `(score, name)` at or after the given pair.
    pub fn seek_ge(&self, score: f64, name: &[u8]) -> Option<MemberId> {
        self.tree
            .lower_bound_by(|m| cmp_key(m, score, name).is_ge())
    }

    /// Member whose rank is `rank(id) + k`.
    pub fn offset(&self, id: MemberId, k: i64) -> Option<MemberId> {
        self.tree.offset(id, k)
    }

    pub fn rank(&self, id: MemberId) -> Option<usize> {
        self.tree.rank(id)
    }

    /// Up to `limit` members starting `offset` ranks away from
    /// `seek_ge(score, name)`.
    pub fn range(
        &self,
        score: f64,
        name: &[u8],
        offset: i64,
        limit: usize,
    ) -> impl Iterator<Item = (MemberId, &Member)> + '_ {
        self.seek_ge(score, name)
            .and_then(|id| self.tree.offset(id, offset))
            .map(|id| self.tree.iter_from(id))
            .into_iter()
            .flatten()
            .take(limit)
    }

    /// Members in ascending `(score, name)` order.
    pub fn iter(&self) -> impl Iterator<Item = (MemberId, &Member)> + '_ {
        self.tree.iter()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.tree.clear();
    }

    fn find(&mut self, hcode: u64, name: &[u8]) -> Option<MemberId> {
        let tree = &self.tree;
        self.index
            .lookup(hcode, |id| tree.get(*id).is_some_and(|m| m.name() == name))
            .and_then(|h| self.index.get(h).copied())
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        self.tree.assert_invariants_by(by_score_then_name);
        assert_eq!(self.index.len(), self.tree.len());
        for (_, id) in self.index.iter() {
            assert!(self.tree.contains(*id), "index points at a dead member");
        }
    }
}
