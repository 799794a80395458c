//! Chunk arithmetic and the chunk index set.

use serde::{Serialize, Serializer};
use std::ops::Range;

/// how a file of `expected_bytes` is cut into chunks of `chunk_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGeometry {
    expected_bytes: u64,
    chunk_size: u64,
}

impl ChunkGeometry {
    /// a zero chunk size is bumped to one byte so the arithmetic stays total
    pub fn new(expected_bytes: u64, chunk_size: u64) -> Self {
        Self {
            expected_bytes,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn expected_bytes(&self) -> u64 {
        self.expected_bytes
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// ceil(expected_bytes / chunk_size)
    pub fn total_chunks(&self) -> usize {
        self.expected_bytes.div_ceil(self.chunk_size) as usize
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.total_chunks()
    }

    pub fn offset(&self, index: usize) -> u64 {
        index as u64 * self.chunk_size
    }

    /// length of chunk `index`, zero when the index is out of range
    pub fn chunk_len(&self, index: usize) -> u64 {
        if !self.contains(index) {
            return 0;
        }
        let start = self.offset(index);
        self.chunk_size.min(self.expected_bytes - start)
    }

    /// byte range `[i*chunk_size, min((i+1)*chunk_size, expected_bytes))`
    pub fn range(&self, index: usize) -> Range<u64> {
        let start = self.offset(index);
        start..start + self.chunk_len(index)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.total_chunks().checked_sub(1)
    }

    pub fn last_chunk_len(&self) -> u64 {
        self.last_index().map(|i| self.chunk_len(i)).unwrap_or(0)
    }

    /// Bytes covered by the chunks in `set`.
    ///
    /// Every chunk but the last is full size, so only the presence of the last
    /// index changes the sum.
    pub fn bytes_covered(&self, set: &ChunkSet) -> u64 {
        let count = set.len() as u64;
        match self.last_index() {
            Some(last) if set.contains(last) => {
                (count - 1) * self.chunk_size + self.last_chunk_len()
            }
            _ => count * self.chunk_size,
        }
    }
}

/// Compact set of chunk indices in `[0, capacity)`, one bit per chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSet {
    words: Vec<u64>,
    capacity: usize,
    len: usize,
}

impl ChunkSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            capacity,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// true once every index in `[0, capacity)` is present
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.capacity && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Returns true when the index was newly added. Out-of-range indices and
    /// duplicates leave the set untouched.
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.capacity || self.contains(index) {
            return false;
        }
        self.words[index / 64] |= 1 << (index % 64);
        self.len += 1;
        true
    }

    pub fn remove(&mut self, index: usize) -> bool {
        if !self.contains(index) {
            return false;
        }
        self.words[index / 64] &= !(1 << (index % 64));
        self.len -= 1;
        true
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |i| self.contains(*i))
    }

    pub fn missing(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |i| !self.contains(*i))
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }
}

// observers get a plain list of indices
impl Serialize for ChunkSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_chunks_is_ceiling() {
        assert_eq!(ChunkGeometry::new(10_000_000, 2_000_000).total_chunks(), 5);
        assert_eq!(ChunkGeometry::new(10_000_001, 2_000_000).total_chunks(), 6);
        assert_eq!(ChunkGeometry::new(1, 2_000_000).total_chunks(), 1);
        assert_eq!(ChunkGeometry::new(0, 2_000_000).total_chunks(), 0);
    }

    #[test]
    fn chunk_lengths_sum_to_file_size() {
        for (size, chunk) in [(1u64, 1u64), (7, 3), (1024, 256), (10_000_001, 2_000_000), (5, 100)] {
            let g = ChunkGeometry::new(size, chunk);
            let sum: u64 = (0..g.total_chunks()).map(|i| g.chunk_len(i)).sum();
            assert_eq!(sum, size, "size={size} chunk={chunk}");
            for i in 0..g.total_chunks().saturating_sub(1) {
                assert_eq!(g.chunk_len(i), chunk);
            }
        }
    }

    #[test]
    fn ranges_are_disjoint_and_contiguous() {
        let g = ChunkGeometry::new(7, 3);
        assert_eq!(g.range(0), 0..3);
        assert_eq!(g.range(1), 3..6);
        assert_eq!(g.range(2), 6..7);
        assert_eq!(g.chunk_len(3), 0);
    }

    #[test]
    fn bytes_covered_accounts_for_short_last_chunk() {
        let g = ChunkGeometry::new(7, 3);
        let mut set = ChunkSet::with_capacity(g.total_chunks());
        assert_eq!(g.bytes_covered(&set), 0);
        set.insert(0);
        assert_eq!(g.bytes_covered(&set), 3);
        set.insert(2);
        assert_eq!(g.bytes_covered(&set), 4);
        set.insert(1);
        assert_eq!(g.bytes_covered(&set), 7);
    }

    #[test]
    fn set_insert_is_idempotent_and_bounded() {
        let mut set = ChunkSet::with_capacity(130);
        assert!(set.insert(0));
        assert!(set.insert(129));
        assert!(!set.insert(129));
        assert!(!set.insert(130));
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_vec(), vec![0, 129]);
        assert!(set.remove(0));
        assert!(!set.remove(0));
        assert_eq!(set.len(), 1);
        assert_eq!(set.missing().count(), 129);
    }

    #[test]
    fn set_serializes_as_list() {
        let mut set = ChunkSet::with_capacity(10);
        set.insert(3);
        set.insert(1);
        assert_eq!(serde_json::to_string(&set).unwrap(), "[1,3]");
    }
}
