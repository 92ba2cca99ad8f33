//! Presentation-order reconstruction
//!
//! Decoders may complete out of order. [`ReorderBuffer`] keeps decoded units
//! in a binary min-heap on their timestamp so the earliest one is always at
//! the root.

use crate::tracks::Timestamped;

/// Binary min-heap keyed on presentation timestamp.
///
/// Each node's timestamp is less than or equal to both children's. Equal
/// timestamps are allowed and come out in no particular order.
#[derive(Debug)]
pub struct ReorderBuffer<T: Timestamped> {
    heap: Vec<T>,
}

impl<T: Timestamped> ReorderBuffer<T> {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    /// Create an empty buffer with room for `capacity` units
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    /// Add a unit
    pub fn insert(&mut self, item: T) {
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1);
    }

    /// Earliest unit, without removing it
    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    /// Timestamp of the earliest unit
    pub fn min_timestamp(&self) -> Option<i64> {
        self.peek().map(Timestamped::timestamp_us)
    }

    /// Remove and return the earliest unit
    pub fn extract_min(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let min = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        min
    }

    /// Number of buffered units
    pub fn size(&self) -> usize {
        self.heap.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every buffered unit
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Check the heap property over the whole tree
    pub fn verify_heap(&self) -> bool {
        (1..self.heap.len())
            .all(|i| self.heap[(i - 1) / 2].timestamp_us() <= self.heap[i].timestamp_us())
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[parent].timestamp_us() <= self.heap[index].timestamp_us() {
                break;
            }
            self.heap.swap(parent, index);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && self.heap[left].timestamp_us() < self.heap[smallest].timestamp_us() {
                smallest = left;
            }
            if right < len && self.heap[right].timestamp_us() < self.heap[smallest].timestamp_us()
            {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.heap.swap(index, smallest);
            index = smallest;
        }
    }
}

impl<T: Timestamped> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Stamp(i64);

    impl Timestamped for Stamp {
        fn timestamp_us(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn test_empty_buffer() {
        let mut buffer: ReorderBuffer<Stamp> = ReorderBuffer::new();
        assert!(buffer.is_empty());
        assert!(buffer.peek().is_none());
        assert!(buffer.extract_min().is_none());
        assert!(buffer.verify_heap());
    }

    #[test]
    fn test_out_of_order_inserts_extract_sorted() {
        let mut buffer = ReorderBuffer::new();
        for ts in [0, 66_666, 33_333] {
            buffer.insert(Stamp(ts));
        }
        assert_eq!(buffer.size(), 3);
        assert_eq!(buffer.min_timestamp(), Some(0));

        let order: Vec<i64> = std::iter::from_fn(|| buffer.extract_min().map(|s| s.0)).collect();
        assert_eq!(order, vec![0, 33_333, 66_666]);
    }

    #[test]
    fn test_heap_invariant_after_every_operation() {
        let mut buffer = ReorderBuffer::new();
        // Deterministic scramble with duplicates.
        let timestamps: Vec<i64> = (0..200).map(|i| (i * 7919) % 101 * 1000).collect();

        for &ts in &timestamps {
            buffer.insert(Stamp(ts));
            assert!(buffer.verify_heap());
        }

        let mut last = i64::MIN;
        while let Some(item) = buffer.extract_min() {
            assert!(buffer.verify_heap());
            assert!(item.0 >= last);
            last = item.0;
        }
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut buffer = ReorderBuffer::new();
        buffer.insert(Stamp(5));
        buffer.insert(Stamp(5));
        buffer.insert(Stamp(1));
        assert_eq!(buffer.extract_min(), Some(Stamp(1)));
        assert_eq!(buffer.extract_min(), Some(Stamp(5)));
        assert_eq!(buffer.extract_min(), Some(Stamp(5)));
    }

    #[test]
    fn test_clear() {
        let mut buffer = ReorderBuffer::with_capacity(4);
        buffer.insert(Stamp(3));
        buffer.insert(Stamp(2));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
