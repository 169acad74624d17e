//! Binary Min-Heap
//!
//! Array-backed priority queue keyed by any `Ord` key. The dispatcher uses it
//! with submission indices as keys to park completions that arrived early.
//!
//! Layout: node `i` has children `2i + 1` and `2i + 2`, parent `(i - 1) / 2`.

use thiserror::Error;

/// Errors reported by [`MinHeap`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// `pop` was called on an empty heap
    #[error("pop from empty heap")]
    Empty,

    /// A parent key is greater than one of its children
    #[error("heap order violated at node {parent}: child {child} has a smaller key")]
    Violation {
        /// Index of the offending parent node
        parent: usize,
        /// Index of the child with the smaller key
        child: usize,
    },
}

/// A keyed entry stored in the heap. Ordering looks at `key` only.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapEntry<K, V> {
    /// Ordering key
    pub key: K,
    /// Data carried alongside the key
    pub payload: V,
}

impl<K, V> HeapEntry<K, V> {
    /// Create a new entry
    pub fn new(key: K, payload: V) -> Self {
        Self { key, payload }
    }

    /// Split the entry into `(key, payload)`
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.payload)
    }
}

/// Binary min-heap over [`HeapEntry`] values
#[derive(Debug, Clone)]
pub struct MinHeap<K, V> {
    nodes: Vec<HeapEntry<K, V>>,
}

impl<K: Ord, V> Default for MinHeap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn left(i: usize) -> usize {
    2 * i + 1
}

#[inline]
fn right(i: usize) -> usize {
    2 * i + 2
}

#[inline]
fn parent(i: usize) -> usize {
    (i - 1) / 2
}

impl<K: Ord, V> MinHeap<K, V> {
    /// Create an empty heap
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Create an empty heap with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the heap holds no entries
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Iterate over entries in storage (not key) order
    pub fn iter(&self) -> impl Iterator<Item = &HeapEntry<K, V>> {
        self.nodes.iter()
    }

    /// Insert an entry, sifting it up toward the root. O(log n).
    pub fn insert(&mut self, entry: HeapEntry<K, V>) {
        self.nodes.push(entry);
        let mut i = self.nodes.len() - 1;
        while i > 0 && self.nodes[i].key < self.nodes[parent(i)].key {
            self.nodes.swap(i, parent(i));
            i = parent(i);
        }
        debug_assert_eq!(self.validate(), Ok(()));
    }

    /// Convenience wrapper around [`MinHeap::insert`]
    pub fn push(&mut self, key: K, payload: V) {
        self.insert(HeapEntry::new(key, payload));
    }

    /// Remove and return the entry with the smallest key
    pub fn pop(&mut self) -> Result<HeapEntry<K, V>, HeapError> {
        if self.nodes.is_empty() {
            return Err(HeapError::Empty);
        }
        let last = self.nodes.len() - 1;
        self.nodes.swap(0, last);
        let min = self.nodes.pop().ok_or(HeapError::Empty)?;
        self.sift_down(0);
        debug_assert_eq!(self.validate(), Ok(()));
        Ok(min)
    }

    /// Smallest entry without removing it
    pub fn peek(&self) -> Option<&HeapEntry<K, V>> {
        self.nodes.first()
    }

    /// Key of the smallest entry
    pub fn peek_key(&self) -> Option<&K> {
        self.peek().map(|entry| &entry.key)
    }

    /// Check that every parent key is <= both of its children's keys
    pub fn validate(&self) -> Result<(), HeapError> {
        let n = self.nodes.len();
        for i in 0..n {
            for child in [left(i), right(i)] {
                if child < n && self.nodes[child].key < self.nodes[i].key {
                    return Err(HeapError::Violation { parent: i, child });
                }
            }
        }
        Ok(())
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.nodes.len();
        loop {
            let (l, r) = (left(i), right(i));
            let mut smallest = i;
            if l < n && self.nodes[l].key < self.nodes[smallest].key {
                smallest = l;
            }
            if r < n && self.nodes[r].key < self.nodes[smallest].key {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.nodes.swap(i, smallest);
            i = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_keys(heap: &mut MinHeap<u32, ()>) -> Vec<u32> {
        let mut keys = Vec::new();
        while let Ok(entry) = heap.pop() {
            keys.push(entry.key);
            assert!(heap.validate().is_ok());
        }
        keys
    }

    #[test]
    fn test_pops_in_key_order() {
        let mut heap = MinHeap::new();
        for key in [5, 3, 8, 1, 4] {
            heap.push(key, ());
            assert!(heap.validate().is_ok());
        }
        assert_eq!(drain_keys(&mut heap), vec![1, 3, 4, 5, 8]);
    }

    #[test]
    fn test_pop_empty() {
        let mut heap: MinHeap<u32, ()> = MinHeap::new();
        assert_eq!(heap.pop(), Err(HeapError::Empty));
        assert!(heap.peek().is_none());
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let mut heap = MinHeap::new();
        heap.push(7, "seven");
        heap.push(2, "two");
        assert_eq!(heap.peek().map(|e| e.payload), Some("two"));
        assert_eq!(heap.peek_key(), Some(&2));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_payload_travels_with_key() {
        let mut heap = MinHeap::new();
        heap.push(2, "c");
        heap.push(0, "a");
        heap.push(1, "b");
        let payloads: Vec<_> = std::iter::from_fn(|| heap.pop().ok())
            .map(|e| e.into_parts().1)
            .collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_descending_inserts() {
        let mut heap = MinHeap::with_capacity(64);
        for key in (0..64).rev() {
            heap.push(key, ());
        }
        assert_eq!(drain_keys(&mut heap), (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear() {
        let mut heap = MinHeap::new();
        heap.push(1, ());
        heap.push(0, ());
        heap.clear();
        assert!(heap.is_empty());
        assert_eq!(heap.pop(), Err(HeapError::Empty));
    }

    #[test]
    fn test_validate_detects_violation() {
        let heap = MinHeap {
            nodes: vec![HeapEntry::new(3, ()), HeapEntry::new(1, ())],
        };
        assert_eq!(
            heap.validate(),
            Err(HeapError::Violation {
                parent: 0,
                child: 1
            })
        );
    }
}
