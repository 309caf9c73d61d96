//! OrderTree: AVL tree augmented with subtree sizes, stored in a slot arena.
//!
//! Nodes are addressed by generational `NodeId`s. Parent links are
//! back-indices into the same arena, so rotations only rewrite ids and a
//! node keeps its id for as long as it stays in the tree, including when a
//! two-children deletion moves its in-order successor into the vacated
//! position.
//!
//! The tree does not know how its values are ordered. Mutating calls that
//! place a node (`insert_by`, `update_by`) take the comparator; queries take
//! a monotone predicate (`lower_bound_by`) or work purely on ranks
//! (`offset`, `rank`).

use core::cmp::Ordering;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Stable, generational id of a node in an `OrderTree`.
    pub struct NodeId;
}

#[derive(Debug)]
struct TreeNode<T> {
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: u32,
    count: u32,
    value: T,
}

impl<T> TreeNode<T> {
    fn new(value: T) -> Self {
        Self {
            parent: None,
            left: None,
            right: None,
            height: 1,
            count: 1,
            value,
        }
    }
}

pub struct OrderTree<T> {
    nodes: SlotMap<NodeId, TreeNode<T>>,
    root: Option<NodeId>,
}

impl<T> Default for OrderTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for OrderTree<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OrderTree")
            .field("len", &self.len())
            .field("height", &self.height())
            .finish()
    }
}

/// In-order iterator over `(NodeId, &T)`.
pub struct Iter<'a, T> {
    tree: &'a OrderTree<T>,
    next: Option<NodeId>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.successor(id);
        self.remaining = self.remaining.saturating_sub(1);
        Some((id, &self.tree.nodes[id].value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> OrderTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            root: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Height of the whole tree; 0 when empty.
    pub fn height(&self) -> u32 {
        self.height_of(self.root)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id).map(|n| &n.value)
    }

    /// Insert `value` at the position given by `cmp`. Equal values go to the
    /// right of existing ones.
    pub fn insert_by<F>(&mut self, value: T, cmp: F) -> NodeId
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let id = self.nodes.insert(TreeNode::new(value));
        self.attach_by(id, cmp);
        id
    }

    /// Change the ordering key of a node: detach it, apply `mutate`, and
    /// reattach it by `cmp`. Returns `false` for a stale id.
    pub fn update_by<M, F>(&mut self, id: NodeId, mutate: M, cmp: F) -> bool
    where
        M: FnOnce(&mut T),
        F: FnMut(&T, &T) -> Ordering,
    {
        if !self.nodes.contains_key(id) {
            return false;
        }
        self.detach(id);
        mutate(&mut self.nodes[id].value);
        self.attach_by(id, cmp);
        true
    }

    /// Remove a node and return its value; `None` for a stale id.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        if !self.nodes.contains_key(id) {
            return None;
        }
        self.detach(id);
        self.nodes.remove(id).map(|n| n.value)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    pub fn first(&self) -> Option<NodeId> {
        self.root.map(|r| self.leftmost(r))
    }

    pub fn last(&self) -> Option<NodeId> {
        let mut cur = self.root?;
        while let Some(r) = self.nodes[cur].right {
            cur = r;
        }
        Some(cur)
    }

    /// Leftmost node whose value satisfies `pred`. `pred` must be monotone
    /// over the in-order sequence: false for a prefix, true for the rest.
    pub fn lower_bound_by<P>(&self, mut pred: P) -> Option<NodeId>
    where
        P: FnMut(&T) -> bool,
    {
        let mut cur = self.root;
        let mut found = None;
        while let Some(k) = cur {
            let n = &self.nodes[k];
            if pred(&n.value) {
                found = Some(k);
                cur = n.left;
            } else {
                cur = n.right;
            }
        }
        found
    }

    /// The node whose in-order rank is `rank(id) + k`, or `None` when that
    /// falls outside the tree. Runs in O(log n) for any `k` by skipping whole
    /// subtrees through their counts.
    pub fn offset(&self, id: NodeId, k: i64) -> Option<NodeId> {
        self.nodes.get(id)?;
        let mut node = id;
        // Rank of `node` relative to `id`.
        let mut pos: i64 = 0;
        while pos != k {
            let n = &self.nodes[node];
            let left_cnt = i64::from(self.count_of(n.left));
            let right_cnt = i64::from(self.count_of(n.right));
            let down_right = n.right.filter(|_| pos < k && pos + right_cnt >= k);
            let down_left = n.left.filter(|_| pos > k && pos - left_cnt <= k);
            if let Some(r) = down_right {
                node = r;
                pos += i64::from(self.count_of(self.nodes[r].left)) + 1;
            } else if let Some(l) = down_left {
                node = l;
                pos -= i64::from(self.count_of(self.nodes[l].right)) + 1;
            } else {
                let parent = n.parent?;
                if self.nodes[parent].right == Some(node) {
                    pos -= left_cnt + 1;
                } else {
                    pos += right_cnt + 1;
                }
                node = parent;
            }
        }
        Some(node)
    }

    /// Zero-based in-order position of a node.
    pub fn rank(&self, id: NodeId) -> Option<usize> {
        let n = self.nodes.get(id)?;
        let mut rank = self.count_of(n.left) as usize;
        let mut cur = id;
        while let Some(p) = self.nodes[cur].parent {
            let pn = &self.nodes[p];
            if pn.right == Some(cur) {
                rank += self.count_of(pn.left) as usize + 1;
            }
            cur = p;
        }
        Some(rank)
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            tree: self,
            next: self.first(),
            remaining: self.len(),
        }
    }

    /// In-order iterator starting at `id` (inclusive).
    pub fn iter_from(&self, id: NodeId) -> Iter<'_, T> {
        let remaining = self.rank(id).map_or(0, |r| self.len() - r);
        Iter {
            tree: self,
            next: self.nodes.contains_key(id).then_some(id),
            remaining,
        }
    }

    #[inline]
    fn height_of(&self, n: Option<NodeId>) -> u32 {
        n.map_or(0, |k| self.nodes[k].height)
    }

    #[inline]
    fn count_of(&self, n: Option<NodeId>) -> u32 {
        n.map_or(0, |k| self.nodes[k].count)
    }

    fn leftmost(&self, mut k: NodeId) -> NodeId {
        while let Some(l) = self.nodes[k].left {
            k = l;
        }
        k
    }

    fn successor(&self, k: NodeId) -> Option<NodeId> {
        if let Some(r) = self.nodes[k].right {
            return Some(self.leftmost(r));
        }
        let mut cur = k;
        while let Some(p) = self.nodes[cur].parent {
            if self.nodes[p].left == Some(cur) {
                return Some(p);
            }
            cur = p;
        }
        None
    }

    fn update(&mut self, k: NodeId) {
        let (l, r) = (self.nodes[k].left, self.nodes[k].right);
        let height = 1 + self.height_of(l).max(self.height_of(r));
        let count = 1 + self.count_of(l) + self.count_of(r);
        let n = &mut self.nodes[k];
        n.height = height;
        n.count = count;
    }

    /// Point whichever child link of `parent` held `old` at `new`.
    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: Option<NodeId>) {
        let p = &mut self.nodes[parent];
        if p.left == Some(old) {
            p.left = new;
        } else {
            debug_assert_eq!(p.right, Some(old), "node is not a child of its parent");
            p.right = new;
        }
    }

    // The caller relinks the returned subtree root into the parent.
    fn rotate_left(&mut self, k: NodeId) -> NodeId {
        let parent = self.nodes[k].parent;
        let pivot = self.nodes[k]
            .right
            .expect("left rotation needs a right child");
        let inner = self.nodes[pivot].left;
        self.nodes[k].right = inner;
        if let Some(i) = inner {
            self.nodes[i].parent = Some(k);
        }
        self.nodes[pivot].parent = parent;
        self.nodes[pivot].left = Some(k);
        self.nodes[k].parent = Some(pivot);
        self.update(k);
        self.update(pivot);
        pivot
    }

    fn rotate_right(&mut self, k: NodeId) -> NodeId {
        let parent = self.nodes[k].parent;
        let pivot = self.nodes[k]
            .left
            .expect("right rotation needs a left child");
        let inner = self.nodes[pivot].right;
        self.nodes[k].left = inner;
        if let Some(i) = inner {
            self.nodes[i].parent = Some(k);
        }
        self.nodes[pivot].parent = parent;
        self.nodes[pivot].right = Some(k);
        self.nodes[k].parent = Some(pivot);
        self.update(k);
        self.update(pivot);
        pivot
    }

    fn fix_left_heavy(&mut self, k: NodeId) -> NodeId {
        let left = self.nodes[k]
            .left
            .expect("left-heavy node has a left child");
        if self.height_of(self.nodes[left].left) < self.height_of(self.nodes[left].right) {
            let sub = self.rotate_left(left);
            self.nodes[k].left = Some(sub);
        }
        self.rotate_right(k)
    }

    fn fix_right_heavy(&mut self, k: NodeId) -> NodeId {
        let right = self.nodes[k]
            .right
            .expect("right-heavy node has a right child");
        if self.height_of(self.nodes[right].right) < self.height_of(self.nodes[right].left) {
            let sub = self.rotate_right(right);
            self.nodes[k].right = Some(sub);
        }
        self.rotate_left(k)
    }

    /// Walk from `k` to the root, refreshing height and count and rotating
    /// wherever child heights differ by two. Returns the root.
    fn fix(&mut self, mut k: NodeId) -> NodeId {
        loop {
            let parent = self.nodes[k].parent;
            self.update(k);
            let l = self.height_of(self.nodes[k].left);
            let r = self.height_of(self.nodes[k].right);
            let sub = if l == r + 2 {
                self.fix_left_heavy(k)
            } else if l + 2 == r {
                self.fix_right_heavy(k)
            } else {
                k
            };
            match parent {
                None => return sub,
                Some(p) => {
                    if sub != k {
                        self.replace_child(p, k, Some(sub));
                    }
                    k = p;
                }
            }
        }
    }

    /// Splice out a node with at most one child. Returns the new root.
    fn unlink_easy(&mut self, k: NodeId) -> Option<NodeId> {
        let n = &self.nodes[k];
        debug_assert!(n.left.is_none() || n.right.is_none());
        let child = n.left.or(n.right);
        let parent = n.parent;
        if let Some(c) = child {
            self.nodes[c].parent = parent;
        }
        match parent {
            None => child,
            Some(p) => {
                self.replace_child(p, k, child);
                Some(self.fix(p))
            }
        }
    }

    /// Take `k` out of the tree structure. Returns the new root.
    fn unlink(&mut self, k: NodeId) -> Option<NodeId> {
        let n = &self.nodes[k];
        let (Some(_), Some(right)) = (n.left, n.right) else {
            return self.unlink_easy(k);
        };
        let successor = self.leftmost(right);
        let mut root = self.unlink_easy(successor);

        // The successor takes over k's links as they stand after rebalancing.
        let n = &self.nodes[k];
        let (parent, left, right, height, count) = (n.parent, n.left, n.right, n.height, n.count);
        let s = &mut self.nodes[successor];
        s.parent = parent;
        s.left = left;
        s.right = right;
        s.height = height;
        s.count = count;
        for child in [left, right].into_iter().flatten() {
            self.nodes[child].parent = Some(successor);
        }
        match parent {
            None => root = Some(successor),
            Some(p) => self.replace_child(p, k, Some(successor)),
        }
        root
    }

    fn detach(&mut self, k: NodeId) {
        self.root = self.unlink(k);
        let n = &mut self.nodes[k];
        n.parent = None;
        n.left = None;
        n.right = None;
        n.height = 1;
        n.count = 1;
    }

    fn attach_by<F>(&mut self, k: NodeId, mut cmp: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(c) = cur {
            go_left = cmp(&self.nodes[k].value, &self.nodes[c].value) == Ordering::Less;
            parent = Some(c);
            cur = if go_left {
                self.nodes[c].left
            } else {
                self.nodes[c].right
            };
        }
        self.nodes[k].parent = parent;
        if let Some(p) = parent {
            if go_left {
                self.nodes[p].left = Some(k);
            } else {
                self.nodes[p].right = Some(k);
            }
        }
        self.root = Some(self.fix(k));
    }

    /// Panics unless every structural invariant holds and the in-order
    /// sequence is non-decreasing under `cmp`.
    #[cfg(test)]
    pub(crate) fn assert_invariants_by<F>(&self, mut cmp: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if let Some(r) = self.root {
            assert!(self.nodes[r].parent.is_none(), "root has a parent");
        }
        assert_eq!(
            self.count_of(self.root) as usize,
            self.nodes.len(),
            "root count must cover every node"
        );
        self.assert_subtree(None, self.root);
        let ordered: Vec<&T> = self.iter().map(|(_, v)| v).collect();
        assert_eq!(ordered.len(), self.len());
        for w in ordered.windows(2) {
            assert_ne!(
                cmp(w[0], w[1]),
                Ordering::Greater,
                "in-order traversal is not sorted"
            );
        }
    }

    #[cfg(test)]
    fn assert_subtree(&self, parent: Option<NodeId>, node: Option<NodeId>) {
        let Some(k) = node else {
            return;
        };
        let n = &self.nodes[k];
        assert_eq!(n.parent, parent, "broken parent back-link");
        self.assert_subtree(Some(k), n.left);
        self.assert_subtree(Some(k), n.right);
        let (l, r) = (self.height_of(n.left), self.height_of(n.right));
        assert!(l.abs_diff(r) <= 1, "unbalanced node: {l} vs {r}");
        assert_eq!(n.height, 1 + l.max(r), "stale height");
        assert_eq!(
            n.count,
            1 + self.count_of(n.left) + self.count_of(n.right),
            "stale count"
        );
    }
}
