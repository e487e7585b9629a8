#![forbid(unsafe_code)]

//! Min-heap of task keys.
//!
//! Entries carry only `(sort_index, id)`; task bodies live in the
//! scheduler's table. Re-keying a task (timer promotion) pushes a new entry
//! into the other heap instead of mutating one in place, so the heap never
//! holds a key that disagrees with its position.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap key: ordered by `sort_index`, ties broken by insertion id.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapEntry {
    pub sort_index: f64,
    pub id: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key surfaces.
        other
            .sort_index
            .total_cmp(&self.sort_index)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Binary min-heap over [`HeapEntry`].
#[derive(Debug, Default)]
pub(crate) struct TaskHeap {
    inner: BinaryHeap<HeapEntry>,
}

impl TaskHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sort_index: f64, id: u64) {
        self.inner.push(HeapEntry { sort_index, id });
    }

    pub fn peek(&self) -> Option<HeapEntry> {
        self.inner.peek().copied()
    }

    pub fn pop(&mut self) -> Option<HeapEntry> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_smallest_first() {
        let mut heap = TaskHeap::new();
        heap.push(30.0, 1);
        heap.push(10.0, 2);
        heap.push(20.0, 3);
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.id)).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn ties_break_by_insertion_id() {
        let mut heap = TaskHeap::new();
        heap.push(5.0, 9);
        heap.push(5.0, 3);
        heap.push(5.0, 7);
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.id)).collect();
        assert_eq!(order, vec![3, 7, 9]);
    }

    #[test]
    fn negative_keys_sort_before_zero() {
        let mut heap = TaskHeap::new();
        heap.push(0.0, 1);
        heap.push(-1.0, 2);
        assert_eq!(heap.peek().map(|e| e.id), Some(2));
        assert_eq!(heap.len(), 2);
    }
}
