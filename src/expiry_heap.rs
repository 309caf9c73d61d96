//! ExpiryHeap: binary min-heap whose elements report their own position.
//!
//! `update` is the single primitive: it restores heap order around one index
//! and tells the caller about every element it moves, so owners can keep a
//! back-reference to "where am I in the heap" and later change or cancel
//! their entry in O(log n).
//!
//! `ExpiryHeap<K>` packages the primitive for owners identified by slotmap
//! keys, keeping their positions in a `SecondaryMap`.

use slotmap::{Key, SecondaryMap};

/// One heap element: a priority (usually a deadline in milliseconds) and the
/// key of the record that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapItem<K> {
    pub val: u64,
    pub owner: K,
}

#[inline]
fn parent(i: usize) -> usize {
    (i + 1) / 2 - 1
}

#[inline]
fn left(i: usize) -> usize {
    i * 2 + 1
}

#[inline]
fn right(i: usize) -> usize {
    i * 2 + 2
}

fn sift_up<K, R>(heap: &mut [HeapItem<K>], mut pos: usize, relocate: &mut R)
where
    K: Copy,
    R: FnMut(K, usize),
{
    let item = heap[pos];
    while pos > 0 && heap[parent(pos)].val > item.val {
        heap[pos] = heap[parent(pos)];
        relocate(heap[pos].owner, pos);
        pos = parent(pos);
    }
    heap[pos] = item;
    relocate(item.owner, pos);
}

fn sift_down<K, R>(heap: &mut [HeapItem<K>], mut pos: usize, relocate: &mut R)
where
    K: Copy,
    R: FnMut(K, usize),
{
    let len = heap.len();
    let item = heap[pos];
    loop {
        let (l, r) = (left(pos), right(pos));
        let mut min_pos = pos;
        let mut min_val = item.val;
        if l < len && heap[l].val < min_val {
            min_pos = l;
            min_val = heap[l].val;
        }
        if r < len && heap[r].val < min_val {
            min_pos = r;
        }
        if min_pos == pos {
            break;
        }
        heap[pos] = heap[min_pos];
        relocate(heap[pos].owner, pos);
        pos = min_pos;
    }
    heap[pos] = item;
    relocate(item.owner, pos);
}

/// Restore heap order for the element at `pos` after it was inserted,
/// changed, or dropped into a vacated slot. `relocate(owner, index)` is
/// called for every element that lands on a new index, including the one at
/// `pos`, before the next comparison is made.
///
/// # Panics
///
/// If `pos` is out of range.
pub fn update<K, R>(heap: &mut [HeapItem<K>], pos: usize, mut relocate: R)
where
    K: Copy,
    R: FnMut(K, usize),
{
    assert!(
        pos < heap.len(),
        "heap position {pos} out of range for length {}",
        heap.len()
    );
    if pos > 0 && heap[parent(pos)].val > heap[pos].val {
        sift_up(heap, pos, &mut relocate);
    } else {
        sift_down(heap, pos, &mut relocate);
    }
}

/// Min-heap of deadlines keyed by owner, with O(1) position lookup.
#[derive(Debug, Clone)]
pub struct ExpiryHeap<K: Key> {
    items: Vec<HeapItem<K>>,
    positions: SecondaryMap<K, usize>,
}

impl<K: Key> Default for ExpiryHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> ExpiryHeap<K> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            positions: SecondaryMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Set `owner`'s priority, inserting it if absent.
    pub fn schedule(&mut self, owner: K, val: u64) {
        let pos = match self.positions.get(owner) {
            Some(&pos) => {
                self.items[pos].val = val;
                pos
            }
            None => {
                self.items.push(HeapItem { val, owner });
                self.items.len() - 1
            }
        };
        let positions = &mut self.positions;
        update(&mut self.items, pos, |k, i| {
            positions.insert(k, i);
        });
    }

    /// Remove `owner`'s entry and return its priority.
    pub fn cancel(&mut self, owner: K) -> Option<u64> {
        let pos = self.positions.remove(owner)?;
        let item = self.items.swap_remove(pos);
        debug_assert!(item.owner == owner);
        if pos < self.items.len() {
            let positions = &mut self.positions;
            update(&mut self.items, pos, |k, i| {
                positions.insert(k, i);
            });
        }
        Some(item.val)
    }

    pub fn deadline(&self, owner: K) -> Option<u64> {
        self.positions.get(owner).map(|&pos| self.items[pos].val)
    }

    pub fn position(&self, owner: K) -> Option<usize> {
        self.positions.get(owner).copied()
    }

    pub fn peek(&self) -> Option<&HeapItem<K>> {
        self.items.first()
    }

    /// Pop the earliest entry if its priority is at or below `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<HeapItem<K>> {
        let top = *self.items.first().filter(|top| top.val <= now)?;
        self.cancel(top.owner);
        Some(top)
    }

    pub fn as_slice(&self) -> &[HeapItem<K>] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.positions.clear();
    }
}
