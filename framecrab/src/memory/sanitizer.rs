//! Pool block sanitizer.
//!
//! Records the extent of every block handed out by the pool and validates
//! each dereference against it. After a compaction the table is rebuilt from
//! the collector's forwarding information, so an offset that was not updated
//! by the collector no longer names the start of a block and is caught here
//! instead of silently reading another object's bytes.
use super::RawOffset;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MemorySanitizer {
    /// Map from block start offset to block size
    blocks: BTreeMap<RawOffset, usize>,
}

impl MemorySanitizer {
    /// Records a new block.
    ///
    /// # Arguments
    /// * `offset` - Start of the block
    /// * `size` - Rounded size of the block in bytes
    pub fn register_alloc(&mut self, offset: RawOffset, size: usize) {
        // The pool hands out disjoint blocks. Anything else is a pool bug
        // that compromises every object around it, so kaboom!
        assert!(
            !self.has_overlap(offset, size),
            "Block at @{} (size {}) overlaps with existing memory",
            offset,
            size
        );
        self.blocks.insert(offset, size);
    }

    /// Replaces the table with the blocks that survived a collection.
    ///
    /// # Arguments
    /// * `survivors` - New offset and size of every live block
    pub fn rebuild(&mut self, survivors: impl IntoIterator<Item = (RawOffset, usize)>) {
        self.blocks = survivors.into_iter().collect();
    }

    /// Returns the size of the block starting exactly at `offset`.
    ///
    /// # Returns
    /// * `Some(size)` - If a block starts at `offset`
    /// * `None` - If `offset` is not the start of a block
    pub fn block_size(&self, offset: RawOffset) -> Option<usize> {
        self.blocks.get(&offset).copied()
    }

    /// Checks if a byte range is entirely contained within a single block.
    ///
    /// # Arguments
    /// * `at` - Starting pool offset of the range to check
    /// * `size` - Size of the range in bytes
    ///
    /// # Returns
    /// * `true` - If the entire range is within a single block
    /// * `false` - If any part of the range is outside allocated memory
    pub fn contains(&self, at: usize, size: usize) -> bool {
        let Ok(key) = RawOffset::try_from(at) else {
            return false;
        };
        if let Some((&start, &block_size)) = self.blocks.range(..=key).next_back() {
            let block_end = start as usize + block_size;
            at + size <= block_end
        } else {
            false
        }
    }

    /// Number of bytes covered by recorded blocks.
    pub fn used(&self) -> usize {
        self.blocks.values().sum()
    }

    /// Checks if a proposed block would overlap with existing blocks.
    fn has_overlap(&self, offset: RawOffset, size: usize) -> bool {
        let start = offset as usize;
        let end = start + size;

        // Two ranges [a1,a2) and [b1,b2) overlap if: a1 < b2 && b1 < a2
        self.blocks.iter().any(|(&other, &other_size)| {
            let other = other as usize;
            start < other + other_size && other < end
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_contains() {
        let mut sanitizer = MemorySanitizer::default();
        sanitizer.register_alloc(100, 48);

        assert!(sanitizer.contains(100, 1)); // Start of block
        assert!(sanitizer.contains(120, 10)); // Middle of block
        assert!(sanitizer.contains(147, 1)); // End of block
        assert!(!sanitizer.contains(99, 1)); // Before block
        assert!(!sanitizer.contains(148, 1)); // After block
        assert!(!sanitizer.contains(100, 49)); // Extends beyond block
        assert_eq!(sanitizer.block_size(100), Some(48));
        assert_eq!(sanitizer.block_size(104), None);
    }

    #[test]
    #[should_panic(expected = "overlaps with existing memory")]
    fn test_overlapping_blocks() {
        let mut sanitizer = MemorySanitizer::default();
        sanitizer.register_alloc(100, 48);
        sanitizer.register_alloc(92, 12);
    }

    #[test]
    fn test_rebuild() {
        let mut sanitizer = MemorySanitizer::default();
        sanitizer.register_alloc(4, 8);
        sanitizer.register_alloc(12, 16);
        sanitizer.register_alloc(28, 8);
        assert_eq!(sanitizer.used(), 32);

        // Middle block died, last one slid down.
        sanitizer.rebuild([(4, 8), (12, 8)]);
        assert_eq!(sanitizer.used(), 16);
        assert!(sanitizer.contains(12, 8));
        assert!(!sanitizer.contains(20, 1));
        assert_eq!(sanitizer.block_size(28), None);
    }
}
