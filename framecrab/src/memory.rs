//! Relocatable memory pool support.
//!
//! Every dynamically allocated runtime object lives in a single contiguous
//! pool that is compacted by the collector. Objects are therefore named by
//! their byte offset from the pool base ([`Offset`]) rather than by address.
//! An offset stored in a root or inside another pool object is kept up to
//! date by the collector; a byte slice borrowed from the pool is only good
//! until the next allocation, which the borrow checker enforces since every
//! allocation needs `&mut Pool`.
//!
//! The collector itself knows nothing about object layouts. Each object kind
//! registers a [`MemType`] descriptor that reports a block's size and marks or
//! moves the offsets found inside it, using the [`Marker`] and [`Mover`]
//! visitors defined here.

mod pool;
mod sanitizer;

pub use pool::{POOL_ALIGN, POOL_BASE, Pool, PoolStats};

use crate::value::{Value, ValueKind};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU16;
use tracing::trace;
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Untyped pool offset. Zero is the null reference.
pub type RawOffset = u16;

/// Typed reference to a pool object of kind `T`.
///
/// Never null: an absent reference is spelled `Option<Offset<T>>`, which has
/// the same size thanks to the non-zero niche.
pub struct Offset<T> {
    raw: NonZeroU16,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Offset<T> {
    pub fn from_raw(raw: RawOffset) -> Option<Self> {
        NonZeroU16::new(raw).map(|raw| Offset {
            raw,
            _kind: PhantomData,
        })
    }

    /// Wraps an offset freshly handed out by the pool, which is never null.
    pub(crate) fn from_block(raw: RawOffset) -> Self {
        match Self::from_raw(raw) {
            Some(offset) => offset,
            None => panic!("Pool handed out the null offset"),
        }
    }

    pub fn raw(self) -> RawOffset {
        self.raw.get()
    }

    /// Raw form of an optional reference, zero when absent.
    pub fn raw_or_null(offset: Option<Self>) -> RawOffset {
        offset.map_or(0, Offset::raw)
    }
}

impl<T: PoolObject> Offset<T> {
    /// Hands an optional root to a root visitor and stores back whatever
    /// offset the visitor leaves behind.
    pub fn visit_root(
        root: &mut Option<Self>,
        visit: &mut dyn FnMut(&'static dyn MemType, &mut RawOffset),
    ) {
        if let Some(offset) = root {
            let mut raw = offset.raw();
            visit(T::MEM, &mut raw);
            debug_assert_ne!(raw, 0, "live {} moved to the null offset", T::MEM.name());
            *root = Offset::from_raw(raw);
        }
    }
}

impl<T> Clone for Offset<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Offset<T> {}

impl<T> PartialEq for Offset<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Offset<T> {}

impl<T> fmt::Debug for Offset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.raw)
    }
}

/// Object descriptor registered by every pool object kind.
///
/// The collector calls `mark` once per newly marked block during the mark
/// phase, and `relocate` once per live block during the move phase, before
/// any bytes are slid. Both receive the block's offset at that time.
pub trait MemType: Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Size in bytes of the block that starts at `block[0]`.
    fn size(&self, block: &[u8]) -> usize;

    fn mark(&self, marker: &mut Marker<'_>, offset: RawOffset);

    fn relocate(&self, mover: &mut Mover<'_>, offset: RawOffset);
}

/// Rust-side tag for a kind of pool object.
pub trait PoolObject {
    const MEM: &'static dyn MemType;
}

/// Enumerates the roots a collection must keep alive and update.
///
/// Implementors hand every non-null root to `visit` together with the
/// descriptor of the referenced object, and must store back the offset the
/// visitor leaves in place.
pub trait RootSet {
    fn visit_roots(&mut self, visit: &mut dyn FnMut(&'static dyn MemType, &mut RawOffset));
}

/// Root set without any roots.
impl RootSet for () {
    fn visit_roots(&mut self, _visit: &mut dyn FnMut(&'static dyn MemType, &mut RawOffset)) {}
}

/// Copies a `T` out of `heap` at byte offset `at`.
pub(crate) fn read_at<T: FromBytes>(heap: &[u8], at: usize) -> T {
    match heap.get(at..).map(T::read_from_prefix) {
        Some(Ok((value, _))) => value,
        _ => panic!(
            "Read of {} bytes at offset {} is outside the pool",
            size_of::<T>(),
            at
        ),
    }
}

/// Copies `value` into `heap` at byte offset `at`.
pub(crate) fn write_at<T: IntoBytes + Immutable>(heap: &mut [u8], at: usize, value: &T) {
    let written = heap
        .get_mut(at..)
        .is_some_and(|dst| value.write_to_prefix(dst).is_ok());
    assert!(
        written,
        "Write of {} bytes at offset {} is outside the pool",
        size_of::<T>(),
        at
    );
}

/// Rounds a block size up to the pool alignment.
pub(crate) fn round_size(size: usize) -> usize {
    size.next_multiple_of(POOL_ALIGN)
}

type Pending = SmallVec<[(&'static dyn MemType, RawOffset); 16]>;

/// Mark-phase visitor handed to [`MemType::mark`].
pub struct Marker<'a> {
    heap: &'a [u8],
    /// Marked blocks: offset to rounded size.
    live: &'a mut BTreeMap<RawOffset, usize>,
    /// Marked blocks whose contents have not been scanned yet.
    pending: Pending,
}

impl<'a> Marker<'a> {
    pub(crate) fn new(heap: &'a [u8], live: &'a mut BTreeMap<RawOffset, usize>) -> Self {
        Marker {
            heap,
            live,
            pending: SmallVec::new(),
        }
    }

    pub fn read<T: FromBytes>(&self, at: usize) -> T {
        read_at(self.heap, at)
    }

    /// Marks the block at `offset` without scanning its contents.
    ///
    /// Returns whether the block had already been marked.
    pub fn mark_block_offset(&mut self, ty: &'static dyn MemType, offset: RawOffset) -> bool {
        if self.live.contains_key(&offset) {
            return true;
        }
        let size = round_size(ty.size(&self.heap[offset as usize..]));
        trace!("mark {} @{} ({} bytes)", ty.name(), offset, size);
        self.live.insert(offset, size);
        false
    }

    /// Marks the block at `offset` and schedules its contents for scanning.
    pub fn mark_offset(&mut self, ty: &'static dyn MemType, offset: RawOffset) {
        if offset != 0 && !self.mark_block_offset(ty, offset) {
            self.pending.push((ty, offset));
        }
    }

    /// Marks whatever object `value` references.
    pub fn mark_value(&mut self, value: Value) {
        match value.kind() {
            ValueKind::Str(offset) => self.mark_offset(crate::object::Str::MEM, offset.raw()),
            ValueKind::Code(offset) => self.mark_offset(crate::object::Code::MEM, offset.raw()),
            ValueKind::Int(_) | ValueKind::None | ValueKind::Global => {}
        }
    }

    /// Scans every scheduled block until nothing new is reachable.
    pub(crate) fn drain(&mut self) {
        while let Some((ty, offset)) = self.pending.pop() {
            ty.mark(self, offset);
        }
    }
}

/// Move-phase visitor handed to [`MemType::relocate`].
///
/// Fix-ups are written at a block's current location; the collector slides
/// blocks to their new offsets only after every live block has been fixed.
pub struct Mover<'a> {
    heap: &'a mut [u8],
    forward: &'a BTreeMap<RawOffset, RawOffset>,
    /// Blocks already handed to their descriptor, by old offset.
    moved: BTreeSet<RawOffset>,
    pending: Pending,
}

impl<'a> Mover<'a> {
    pub(crate) fn new(heap: &'a mut [u8], forward: &'a BTreeMap<RawOffset, RawOffset>) -> Self {
        Mover {
            heap,
            forward,
            moved: BTreeSet::new(),
            pending: SmallVec::new(),
        }
    }

    pub fn read<T: FromBytes>(&self, at: usize) -> T {
        read_at(self.heap, at)
    }

    pub fn write<T: IntoBytes + Immutable>(&mut self, at: usize, value: &T) {
        write_at(self.heap, at, value)
    }

    fn forward(&self, offset: RawOffset) -> RawOffset {
        match self.forward.get(&offset) {
            Some(&new) => new,
            // The mark phase visits the same graph, so this is a collector bug.
            None => panic!("Block @{} was moved without being marked", offset),
        }
    }

    /// Rewrites `offset` to the block's new location without scheduling its
    /// contents.
    ///
    /// Returns whether the block had already been visited.
    pub fn move_block_offset(&mut self, offset: &mut RawOffset) -> bool {
        let old = *offset;
        *offset = self.forward(old);
        !self.moved.insert(old)
    }

    /// Rewrites `offset` and schedules the block's contents for fix-up.
    pub fn move_offset(&mut self, ty: &'static dyn MemType, offset: &mut RawOffset) {
        if *offset == 0 {
            return;
        }
        let old = *offset;
        if !self.move_block_offset(offset) {
            trace!("move {} @{} -> @{}", ty.name(), old, *offset);
            self.pending.push((ty, old));
        }
    }

    /// Rewrites the reference carried by `value`, if any.
    pub fn move_value(&mut self, value: &mut Value) {
        let (ty, old) = match value.kind() {
            ValueKind::Str(offset) => (crate::object::Str::MEM, offset.raw()),
            ValueKind::Code(offset) => (crate::object::Code::MEM, offset.raw()),
            ValueKind::Int(_) | ValueKind::None | ValueKind::Global => return,
        };
        let mut offset = old;
        self.move_offset(ty, &mut offset);
        *value = value.with_offset(offset);
    }

    pub(crate) fn drain(&mut self) {
        while let Some((ty, offset)) = self.pending.pop() {
            ty.relocate(self, offset);
        }
    }
}
