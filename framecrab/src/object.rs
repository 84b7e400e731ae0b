//! Leaf pool objects: code objects and strings.
//!
//! Both share the layout `[len: u16][len bytes]` and hold no references, so
//! their descriptors have nothing to mark or move inside.

use crate::memory::{MemType, Marker, Mover, PoolObject, RawOffset, read_at};

const LEN_SIZE: usize = size_of::<u16>();

/// Compiled function body. Frames reference the code they resume into.
pub struct Code;

/// Immutable UTF-8 string.
pub struct Str;

struct CodeMem;
struct StrMem;

impl PoolObject for Code {
    const MEM: &'static dyn MemType = &CodeMem;
}

impl PoolObject for Str {
    const MEM: &'static dyn MemType = &StrMem;
}

/// Bytes needed for a byte-string object with `len` payload bytes.
pub(crate) fn bytes_size(len: usize) -> usize {
    LEN_SIZE + len
}

/// Payload of a byte-string object whose block starts at `block[0]`.
pub(crate) fn payload(block: &[u8]) -> &[u8] {
    let len = read_at::<u16>(block, 0) as usize;
    &block[LEN_SIZE..LEN_SIZE + len]
}

/// Writes a byte-string object into a freshly allocated block.
pub(crate) fn fill(block: &mut [u8], bytes: &[u8]) {
    block[..LEN_SIZE].copy_from_slice(&(bytes.len() as u16).to_ne_bytes());
    block[LEN_SIZE..LEN_SIZE + bytes.len()].copy_from_slice(bytes);
}

impl MemType for CodeMem {
    fn name(&self) -> &'static str {
        "code"
    }

    fn size(&self, block: &[u8]) -> usize {
        bytes_size(read_at::<u16>(block, 0) as usize)
    }

    fn mark(&self, _marker: &mut Marker<'_>, _offset: RawOffset) {}

    fn relocate(&self, _mover: &mut Mover<'_>, _offset: RawOffset) {}
}

impl MemType for StrMem {
    fn name(&self) -> &'static str {
        "string"
    }

    fn size(&self, block: &[u8]) -> usize {
        bytes_size(read_at::<u16>(block, 0) as usize)
    }

    fn mark(&self, _marker: &mut Marker<'_>, _offset: RawOffset) {}

    fn relocate(&self, _mover: &mut Mover<'_>, _offset: RawOffset) {}
}
