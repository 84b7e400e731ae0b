//! Compacting pool allocator.
//!
//! Blocks are bump allocated from a single arena. When a request does not
//! fit, the pool runs a full mark-and-compact collection over the caller's
//! roots and the stash, sliding every live block down towards the base and
//! rewriting every offset that refers to a moved block.

use super::sanitizer::MemorySanitizer;
use super::{Marker, MemType, Mover, RawOffset, RootSet, read_at, round_size, write_at};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::value::Value;
use std::collections::BTreeMap;
use tracing::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Every block size is rounded to this many bytes.
pub const POOL_ALIGN: usize = 4;

/// Offset of the first block. The word below it is never handed out, so a
/// raw offset of zero can stand for null.
pub const POOL_BASE: RawOffset = POOL_ALIGN as RawOffset;

/// Fill pattern for memory that does not belong to any block.
const POISON: u8 = 0xA5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Arena size in bytes.
    pub capacity: usize,
    /// Bytes currently covered by blocks, live or not yet collected.
    pub used: usize,
    pub allocations: usize,
    pub collections: usize,
    /// Bytes recovered by all collections so far.
    pub reclaimed: usize,
}

#[derive(Debug)]
pub struct Pool {
    heap: Vec<u8>,
    /// Next free byte.
    top: usize,
    gc_stress: bool,
    sanitizer: MemorySanitizer,
    /// Single-slot root for a value not yet linked into the object graph.
    stash: Option<Value>,
    stats: PoolStats,
}

impl Pool {
    /// Creates an empty pool. The configuration is expected to be valid.
    pub fn new(config: &PoolConfig) -> Self {
        let capacity = config.pool_size as usize;
        let mut heap = vec![POISON; capacity];
        heap[..POOL_BASE as usize].fill(0);
        Self {
            heap,
            top: POOL_BASE as usize,
            gc_stress: config.gc_stress,
            sanitizer: MemorySanitizer::default(),
            stash: None,
            stats: PoolStats {
                capacity,
                ..PoolStats::default()
            },
        }
    }

    /// Bytes still free above the bump pointer.
    pub fn available(&self) -> usize {
        self.heap.len() - self.top
    }

    /// Allocates a zero-filled block of at least `size` bytes.
    ///
    /// May run a collection over `roots` first, which moves every live block
    /// and invalidates every slice previously borrowed from the pool. On
    /// failure nothing has been allocated, though a collection may have run.
    pub fn alloc(
        &mut self,
        ty: &'static dyn MemType,
        size: usize,
        roots: &mut dyn RootSet,
    ) -> Result<RawOffset, PoolError> {
        let size = round_size(size.max(1));
        if self.gc_stress || size > self.available() {
            self.collect(roots);
        }
        if size > self.available() {
            debug!(
                "Out of memory allocating {} ({} bytes, {} available)",
                ty.name(),
                size,
                self.available()
            );
            return Err(PoolError::OutOfMemory {
                requested: size,
                available: self.available(),
            });
        }

        let offset = self.top as RawOffset;
        self.heap[self.top..self.top + size].fill(0);
        self.top += size;
        self.sanitizer.register_alloc(offset, size);
        self.stats.allocations += 1;
        debug!("Allocated {} @{} ({} bytes)", ty.name(), offset, size);
        Ok(offset)
    }

    /// Runs a full mark-and-compact collection.
    pub fn collect(&mut self, roots: &mut dyn RootSet) {
        let mut live = BTreeMap::new();
        {
            let mut marker = Marker::new(&self.heap, &mut live);
            roots.visit_roots(&mut |ty, offset| marker.mark_offset(ty, *offset));
            if let Some(value) = self.stash {
                marker.mark_value(value);
            }
            marker.drain();
        }

        let mut forward = BTreeMap::new();
        let mut top = POOL_BASE as usize;
        for (&old, &size) in &live {
            forward.insert(old, top as RawOffset);
            top += size;
        }

        {
            let mut mover = Mover::new(&mut self.heap, &forward);
            roots.visit_roots(&mut |ty, offset| mover.move_offset(ty, offset));
            if let Some(value) = self.stash.as_mut() {
                mover.move_value(value);
            }
            mover.drain();
        }

        // Destinations never pass their sources, so sliding in address
        // order never overwrites a block that still has to move.
        for (&old, &size) in &live {
            let (old, new) = (old as usize, forward[&old] as usize);
            if new != old {
                self.heap.copy_within(old..old + size, new);
            }
        }
        self.heap[top..self.top].fill(POISON);

        let reclaimed = self.top - top;
        self.top = top;
        self.sanitizer
            .rebuild(live.iter().map(|(old, &size)| (forward[old], size)));
        debug_assert_eq!(self.sanitizer.used(), top - POOL_BASE as usize);
        self.stats.collections += 1;
        self.stats.reclaimed += reclaimed;
        debug!(
            "Collection {}: {} live blocks, {} bytes live, {} bytes reclaimed",
            self.stats.collections,
            live.len(),
            top - POOL_BASE as usize,
            reclaimed
        );
    }

    /// Protects `value` across the next allocation.
    pub fn stash(&mut self, value: Value) {
        assert!(
            self.stash.is_none(),
            "Stash already holds {:?}",
            self.stash
        );
        self.stash = Some(value);
    }

    /// Retrieves the stashed value, updated if the collector moved it.
    pub fn unstash(&mut self) -> Value {
        match self.stash.take() {
            Some(value) => value,
            None => panic!("Unstash without a stashed value"),
        }
    }

    /// Borrows the whole block starting at `offset`.
    pub fn block(&self, offset: RawOffset) -> &[u8] {
        let size = self.block_size(offset);
        &self.heap[offset as usize..offset as usize + size]
    }

    /// Mutably borrows the whole block starting at `offset`.
    pub fn block_mut(&mut self, offset: RawOffset) -> &mut [u8] {
        let size = self.block_size(offset);
        &mut self.heap[offset as usize..offset as usize + size]
    }

    /// Copies a `T` out of the pool. The bytes must lie inside one block.
    pub fn read<T: FromBytes>(&self, at: usize) -> T {
        self.check(at, size_of::<T>());
        read_at(&self.heap, at)
    }

    /// Copies `value` into the pool. The bytes must lie inside one block.
    pub fn write<T: IntoBytes + Immutable>(&mut self, at: usize, value: &T) {
        self.check(at, size_of::<T>());
        write_at(&mut self.heap, at, value)
    }

    /// Copies `len` bytes from `src` to `dst`, each range inside one block.
    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.check(src, len);
        self.check(dst, len);
        self.heap.copy_within(src..src + len, dst);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            used: self.top - POOL_BASE as usize,
            ..self.stats
        }
    }

    fn block_size(&self, offset: RawOffset) -> usize {
        match self.sanitizer.block_size(offset) {
            Some(size) => size,
            None => panic!("@{} does not name a live block", offset),
        }
    }

    fn check(&self, at: usize, size: usize) {
        assert!(
            self.sanitizer.contains(at, size),
            "Access of {} bytes at @{} is outside any block",
            size,
            at
        );
    }
}
