//! Call frames and variable scopes.
//!
//! A frame is a single pool block: a fixed header followed by an inline
//! array of bindings.
//!
//! ```text
//! [nvariables: u16][code: u16][ip: u16][prev: u16][binding 0]...[binding n-1]
//! binding: [id: u16][reserved: u16][value: u32]
//! ```
//!
//! Call frames form a singly linked chain through `prev`, headed by the
//! current-frame root. A separate global frame, created on first use, holds
//! the global bindings and never links anywhere. Both roots live in
//! [`FrameRoots`] and are updated by the collector when frames move.
//!
//! Frames are never resized in place. Growing or shrinking allocates a new
//! block, copies the header and bindings over from whatever block the root
//! names *after* the allocation, and then publishes the new block. The old
//! block simply becomes garbage.

mod scope;
mod stack;

pub use stack::Resume;

use crate::memory::{Marker, MemType, Mover, Offset, PoolObject, RawOffset, RootSet, read_at};
use crate::object::Code;
use crate::value::{Id, Value};
use tracing::trace;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Pool object tag for frames.
pub struct Frame;

struct FrameMem;

impl PoolObject for Frame {
    const MEM: &'static dyn MemType = &FrameMem;
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub(crate) struct FrameHeader {
    pub nvariables: u16,
    /// Code object execution resumes in when this frame is popped.
    pub code: RawOffset,
    /// Resume point within `code`.
    pub ip: u16,
    pub prev: RawOffset,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub(crate) struct RawBinding {
    pub id: u16,
    pub reserved: u16,
    pub value: u32,
}

pub(crate) const HEADER_SIZE: usize = size_of::<FrameHeader>();
pub(crate) const BINDING_SIZE: usize = size_of::<RawBinding>();
pub(crate) const VALUE_OFFSET: usize = std::mem::offset_of!(RawBinding, value);

/// Block size of a frame holding `nvariables` bindings.
pub(crate) fn frame_size(nvariables: u16) -> usize {
    HEADER_SIZE + nvariables as usize * BINDING_SIZE
}

/// Pool offset of binding `index` in the frame at `frame`.
pub(crate) fn binding_at(frame: RawOffset, index: u16) -> usize {
    frame as usize + HEADER_SIZE + index as usize * BINDING_SIZE
}

/// A binding as seen from outside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub id: Id,
    pub value: Value,
}

impl From<RawBinding> for Binding {
    fn from(raw: RawBinding) -> Self {
        Binding {
            id: Id(raw.id),
            value: Value::from_bits(raw.value),
        }
    }
}

impl From<Binding> for RawBinding {
    fn from(binding: Binding) -> Self {
        RawBinding {
            id: binding.id.0,
            reserved: 0,
            value: binding.value.to_bits(),
        }
    }
}

/// Which of the two frame roots a binding lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The current call frame.
    Local,
    /// The global frame.
    Global,
}

/// Location of a resolved binding.
///
/// A slot names a binding by scope and index, never by address, so it is
/// re-derived from the roots on every access and stays usable across
/// allocations. It is invalidated by `push`, `pop` and `delete_global`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub scope: Scope,
    pub index: u16,
}

/// The two frame roots.
#[derive(Debug, Default)]
pub struct FrameRoots {
    /// Active call frame; `None` at top level.
    pub(crate) current: Option<Offset<Frame>>,
    /// Global frame; `None` until the first global is bound.
    pub(crate) globals: Option<Offset<Frame>>,
}

impl FrameRoots {
    pub(crate) fn get(&self, scope: Scope) -> Option<Offset<Frame>> {
        match scope {
            Scope::Local => self.current,
            Scope::Global => self.globals,
        }
    }

    pub(crate) fn set(&mut self, scope: Scope, frame: Offset<Frame>) {
        match scope {
            Scope::Local => self.current = Some(frame),
            Scope::Global => self.globals = Some(frame),
        }
    }
}

impl RootSet for FrameRoots {
    fn visit_roots(&mut self, visit: &mut dyn FnMut(&'static dyn MemType, &mut RawOffset)) {
        Offset::visit_root(&mut self.current, visit);
        Offset::visit_root(&mut self.globals, visit);
    }
}

impl MemType for FrameMem {
    fn name(&self) -> &'static str {
        "frame"
    }

    fn size(&self, block: &[u8]) -> usize {
        frame_size(read_at::<FrameHeader>(block, 0).nvariables)
    }

    /// Marks the whole chain starting at `offset`, stopping at the end of the
    /// chain or at the first predecessor that is already marked.
    fn mark(&self, marker: &mut Marker<'_>, offset: RawOffset) {
        let mut offset = offset;
        loop {
            let header: FrameHeader = marker.read(offset as usize);
            trace!(
                "frame mark @{} vars {} code {} prev {}",
                offset, header.nvariables, header.code, header.prev
            );
            for index in 0..header.nvariables {
                let binding: RawBinding = marker.read(binding_at(offset, index));
                let value = Value::from_bits(binding.value);
                if !value.is_global() {
                    marker.mark_value(value);
                }
            }
            marker.mark_offset(Code::MEM, header.code);
            if header.prev == 0 || marker.mark_block_offset(Frame::MEM, header.prev) {
                break;
            }
            offset = header.prev;
        }
    }

    /// Fixes up the whole chain starting at `offset`, with the same stop
    /// conditions as `mark`. Frames are still at their old offsets here.
    fn relocate(&self, mover: &mut Mover<'_>, offset: RawOffset) {
        let mut offset = offset;
        loop {
            let mut header: FrameHeader = mover.read(offset as usize);
            trace!(
                "frame move @{} vars {} code {} prev {}",
                offset, header.nvariables, header.code, header.prev
            );
            for index in 0..header.nvariables {
                let at = binding_at(offset, index);
                let mut binding: RawBinding = mover.read(at);
                let mut value = Value::from_bits(binding.value);
                if !value.is_global() {
                    mover.move_value(&mut value);
                    binding.value = value.to_bits();
                    mover.write(at, &binding);
                }
            }
            mover.move_offset(Code::MEM, &mut header.code);
            let prev = header.prev;
            let done = prev == 0 || mover.move_block_offset(&mut header.prev);
            mover.write(offset as usize, &header);
            if done {
                break;
            }
            offset = prev;
        }
    }
}
