//! Runtime context.
//!
//! [`Runtime`] owns the pool and the frame roots, so the frame manager, the
//! collector and the interpreter all reach them through one object. It
//! starts with an empty call stack and no global frame; the global frame is
//! created on the first global binding. Both frame roots are handed to the
//! collector on every allocation that triggers a collection.
//!
//! Frame manager operations live in [`crate::frame`].

use crate::config::PoolConfig;
use crate::error::{FrameError, PoolError};
use crate::frame::{Frame, FrameRoots};
use crate::memory::{Offset, Pool, PoolObject, PoolStats};
use crate::object::{self, Code, Str};
use crate::value::Value;
use anyhow::Result;

#[derive(Debug)]
pub struct Runtime {
    pub(crate) pool: Pool,
    pub(crate) roots: FrameRoots,
}

impl Runtime {
    /// Creates a runtime with an empty pool.
    ///
    /// # Returns
    /// * `Ok(Runtime)` - Ready to push frames and bind names
    /// * `Err(anyhow::Error)` - If the configuration is invalid
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool: Pool::new(&config),
            roots: FrameRoots::default(),
        })
    }

    /// Active call frame, `None` at top level.
    ///
    /// The offset is a snapshot; it goes stale at the next allocation.
    pub fn current_frame(&self) -> Option<Offset<Frame>> {
        self.roots.current
    }

    /// Global frame, `None` until the first global is bound.
    pub fn global_frame(&self) -> Option<Offset<Frame>> {
        self.roots.globals
    }

    /// Allocates a zero-filled object of kind `T` with the frame roots as
    /// the root set.
    pub(crate) fn alloc_object<T: PoolObject>(
        &mut self,
        size: usize,
    ) -> Result<Offset<T>, PoolError> {
        let raw = self.pool.alloc(T::MEM, size, &mut self.roots)?;
        Ok(Offset::from_block(raw))
    }

    /// Allocates a string object.
    ///
    /// The returned value is not reachable from any root; store it before
    /// the next allocation (`set` protects it while binding).
    pub fn alloc_str(&mut self, text: &str) -> Result<Value, FrameError> {
        let offset = self.alloc_object::<Str>(object::bytes_size(text.len()))?;
        object::fill(self.pool.block_mut(offset.raw()), text.as_bytes());
        Ok(Value::str(offset))
    }

    /// Text of a string value, or `None` for any other kind of value.
    pub fn str_value(&self, value: Value) -> Option<&str> {
        let offset = value.as_str()?;
        std::str::from_utf8(object::payload(self.pool.block(offset.raw()))).ok()
    }

    /// Allocates a code object holding `bytecode`.
    ///
    /// Like [`Runtime::alloc_str`], the result is unrooted until it is linked
    /// into a frame by `push`.
    pub fn alloc_code(&mut self, bytecode: &[u8]) -> Result<Offset<Code>, FrameError> {
        let offset = self.alloc_object::<Code>(object::bytes_size(bytecode.len()))?;
        object::fill(self.pool.block_mut(offset.raw()), bytecode);
        Ok(offset)
    }

    pub fn code_bytes(&self, code: Offset<Code>) -> &[u8] {
        object::payload(self.pool.block(code.raw()))
    }

    /// Runs a full collection now.
    pub fn collect(&mut self) {
        self.pool.collect(&mut self.roots);
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
