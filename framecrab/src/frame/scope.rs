//! Identifier resolution and scope growth.
//!
//! Every method here that allocates re-reads the frame roots after the
//! allocation returns; nothing derived from a frame offset is kept across
//! a call into the pool.

use super::{
    BINDING_SIZE, Binding, Frame, FrameHeader, RawBinding, Scope, Slot, VALUE_OFFSET, binding_at,
    frame_size,
};
use crate::error::FrameError;
use crate::memory::Offset;
use crate::runtime::Runtime;
use crate::value::{Id, Value};
use smallvec::SmallVec;
use tracing::debug;

impl Runtime {
    /// Resolves `id` to the binding that loads and stores should use.
    ///
    /// A binding in the current call frame wins unless it is a global
    /// indirection, in which case the global frame is searched. When `insert`
    /// is set, a missing identifier is added to the current call frame, or to
    /// the global frame at top level and for global indirections. An inserted
    /// binding holds integer zero until the caller stores into it.
    ///
    /// `Id::NONE` marks formal slots not yet named by `set_formal` and never
    /// resolves, with or without insertion.
    ///
    /// # Returns
    /// * `Ok(Slot)` - Location of the binding
    /// * `Err(FrameError::Unbound)` - Not found and `insert` is false
    /// * `Err(FrameError::OutOfMemory)` - A frame could not be grown
    pub fn resolve(&mut self, id: Id, insert: bool) -> Result<Slot, FrameError> {
        if id == Id::NONE {
            return Err(FrameError::Unbound(id));
        }
        match self.lookup(id) {
            Ok(slot) => return Ok(slot),
            Err(err) if !insert => return Err(err),
            Err(_) => {}
        }
        if self.roots.current.is_some() && self.find(Scope::Local, id).is_none() {
            return self.insert(Scope::Local, id);
        }
        if self.roots.globals.is_none() {
            self.create_globals()?;
        }
        self.insert(Scope::Global, id)
    }

    /// Resolution without insertion. Never allocates.
    pub fn lookup(&self, id: Id) -> Result<Slot, FrameError> {
        if let Some(index) = self.find(Scope::Local, id) {
            let slot = Slot {
                scope: Scope::Local,
                index,
            };
            if !self.load(slot).is_global() {
                return Ok(slot);
            }
        }
        self.find(Scope::Global, id)
            .map(|index| Slot {
                scope: Scope::Global,
                index,
            })
            .ok_or(FrameError::Unbound(id))
    }

    /// Reads the value of a resolved binding.
    pub fn load(&self, slot: Slot) -> Value {
        let at = self.slot_at(slot);
        Value::from_bits(self.pool.read(at + VALUE_OFFSET))
    }

    /// Overwrites the value of a resolved binding.
    pub fn store(&mut self, slot: Slot, value: Value) {
        let at = self.slot_at(slot);
        self.pool.write(at + VALUE_OFFSET, &value.to_bits());
    }

    /// Looks up the current value of `id`.
    pub fn get(&self, id: Id) -> Result<Value, FrameError> {
        let slot = self.lookup(id)?;
        Ok(self.load(slot))
    }

    /// Binds `id` to `value`, creating the binding if needed.
    ///
    /// `value` may reference a pool object; it is stashed while the binding
    /// is created, so it is still valid when stored.
    pub fn set(&mut self, id: Id, value: Value) -> Result<(), FrameError> {
        self.pool.stash(value);
        let slot = self.resolve(id, true);
        let value = self.pool.unstash();
        self.store(slot?, value);
        Ok(())
    }

    /// Declares `id` global within the current call frame.
    ///
    /// Later resolutions of `id` from this frame go to the global frame. At
    /// top level every name is already global and this does nothing. On
    /// failure the frame is unchanged.
    pub fn mark_global(&mut self, id: Id) -> Result<(), FrameError> {
        if id == Id::NONE {
            return Err(FrameError::Unbound(id));
        }
        if self.roots.current.is_none() {
            return Ok(());
        }
        let index = match self.find(Scope::Local, id) {
            Some(index) => index,
            None => self.insert(Scope::Local, id)?.index,
        };
        self.store(
            Slot {
                scope: Scope::Local,
                index,
            },
            Value::GLOBAL,
        );
        Ok(())
    }

    /// Reports whether the current call frame has any binding for `id`,
    /// including a global indirection.
    pub fn is_local(&self, id: Id) -> bool {
        self.find(Scope::Local, id).is_some()
    }

    /// Removes the global binding for `id`.
    ///
    /// # Returns
    /// * `Ok(())` - The binding was removed
    /// * `Err(FrameError::NotFound)` - There is no such global
    /// * `Err(FrameError::OutOfMemory)` - The shrunken frame could not be
    ///   allocated; the global frame is unchanged
    pub fn delete_global(&mut self, id: Id) -> Result<(), FrameError> {
        let index = self
            .find(Scope::Global, id)
            .ok_or(FrameError::NotFound(id))?;
        let nvariables = self.header(Scope::Global).nvariables;

        let new = self.realloc(Scope::Global, nvariables - 1)?;
        let old = self.frame(Scope::Global);
        let skip = index as usize * BINDING_SIZE;
        self.pool
            .copy_within(binding_at(old.raw(), 0), binding_at(new.raw(), 0), skip);
        self.pool.copy_within(
            binding_at(old.raw(), index + 1),
            binding_at(new.raw(), index),
            (nvariables - index - 1) as usize * BINDING_SIZE,
        );
        self.roots.set(Scope::Global, new);
        debug!("Deleted global {} ({} left)", id, nvariables - 1);
        Ok(())
    }

    /// Snapshots every binding of a scope, in binding order.
    pub fn bindings(&self, scope: Scope) -> SmallVec<[Binding; 8]> {
        let Some(frame) = self.roots.get(scope) else {
            return SmallVec::new();
        };
        let nvariables = self.header(scope).nvariables;
        (0..nvariables)
            .map(|index| {
                Binding::from(self.pool.read::<RawBinding>(binding_at(frame.raw(), index)))
            })
            .collect()
    }

    /// Index of the binding for `id` in `scope`, if any. Unnamed formal
    /// slots never match.
    fn find(&self, scope: Scope, id: Id) -> Option<u16> {
        if id == Id::NONE {
            return None;
        }
        let frame = self.roots.get(scope)?;
        let nvariables = self.header(scope).nvariables;
        (0..nvariables).find(|&index| {
            self.pool
                .read::<RawBinding>(binding_at(frame.raw(), index))
                .id
                == id.0
        })
    }

    /// The frame currently backing `scope`.
    pub(crate) fn frame(&self, scope: Scope) -> Offset<Frame> {
        match self.roots.get(scope) {
            Some(frame) => frame,
            None => panic!("No {:?} frame", scope),
        }
    }

    pub(crate) fn header(&self, scope: Scope) -> FrameHeader {
        self.pool.read(self.frame(scope).raw() as usize)
    }

    /// Pool offset of the binding a slot names.
    fn slot_at(&self, slot: Slot) -> usize {
        let frame = self.frame(slot.scope);
        let nvariables = self.header(slot.scope).nvariables;
        assert!(
            slot.index < nvariables,
            "{:?} is out of range for a frame of {} bindings",
            slot,
            nvariables
        );
        binding_at(frame.raw(), slot.index)
    }

    /// Allocates the empty global frame.
    fn create_globals(&mut self) -> Result<(), FrameError> {
        let frame = self.alloc_object::<Frame>(frame_size(0))?;
        self.roots.globals = Some(frame);
        debug!("Created global frame @{}", frame.raw());
        Ok(())
    }

    /// Allocates a replacement for the frame behind `scope` with room for
    /// `nvariables` bindings and copies the header over. Bindings are left
    /// for the caller to copy, and the root still names the old frame.
    fn realloc(&mut self, scope: Scope, nvariables: u16) -> Result<Offset<Frame>, FrameError> {
        let new = self.alloc_object::<Frame>(frame_size(nvariables))?;
        // The allocation may have moved the old frame; read it through the root.
        let mut header = self.header(scope);
        header.nvariables = nvariables;
        self.pool.write(new.raw() as usize, &header);
        Ok(new)
    }

    /// Appends a binding for `id` to the frame behind `scope`.
    fn insert(&mut self, scope: Scope, id: Id) -> Result<Slot, FrameError> {
        let nvariables = self.header(scope).nvariables;
        let new = self.realloc(scope, nvariables + 1)?;
        let old = self.frame(scope);
        self.pool.copy_within(
            binding_at(old.raw(), 0),
            binding_at(new.raw(), 0),
            nvariables as usize * BINDING_SIZE,
        );
        self.pool.write(
            binding_at(new.raw(), nvariables),
            &RawBinding::from(Binding {
                id,
                value: Value::default(),
            }),
        );
        self.roots.set(scope, new);
        debug!(
            "Bound {} in {:?} frame @{} ({} bindings)",
            id,
            scope,
            new.raw(),
            nvariables + 1
        );
        Ok(Slot {
            scope,
            index: nvariables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    const X: Id = Id(1);
    const Y: Id = Id(2);
    const Z: Id = Id(3);

    fn runtime(pool_size: u16, gc_stress: bool) -> Runtime {
        Runtime::new(
            PoolConfig::default()
                .with_pool_size(pool_size)
                .with_gc_stress(gc_stress),
        )
        .unwrap()
    }

    fn int(n: i32) -> Value {
        Value::int(n).unwrap()
    }

    #[test]
    fn test_unbound_without_globals() {
        let mut rt = runtime(256, false);
        assert_eq!(rt.resolve(X, false), Err(FrameError::Unbound(X)));
        assert!(rt.global_frame().is_none());
        assert_eq!(rt.stats().allocations, 0);
    }

    #[test]
    fn test_top_level_set_creates_globals() {
        let mut rt = runtime(256, false);
        rt.set(X, int(1)).unwrap();
        rt.set(Y, int(2)).unwrap();
        rt.set(X, int(3)).unwrap();

        assert_eq!(rt.get(X), Ok(int(3)));
        assert_eq!(rt.get(Y), Ok(int(2)));
        assert_eq!(rt.header(Scope::Global).nvariables, 2);
        assert_eq!(rt.get(Z), Err(FrameError::Unbound(Z)));
    }

    #[test]
    fn test_inserted_binding_reads_zero() {
        let mut rt = runtime(256, false);
        let slot = rt.resolve(X, true).unwrap();
        assert_eq!(
            slot,
            Slot {
                scope: Scope::Global,
                index: 0
            }
        );
        assert_eq!(rt.load(slot), int(0));
    }

    #[test]
    fn test_local_shadows_global() {
        let mut rt = runtime(256, false);
        rt.set(X, int(1)).unwrap();
        rt.push(None, 0, 0).unwrap();
        rt.set(X, int(2)).unwrap();

        assert!(rt.is_local(X));
        assert_eq!(rt.get(X), Ok(int(2)));
        rt.pop();
        assert_eq!(rt.get(X), Ok(int(1)));
    }

    #[test]
    fn test_unknown_local_falls_back_to_global() {
        let mut rt = runtime(256, false);
        rt.set(X, int(7)).unwrap();
        rt.push(None, 0, 0).unwrap();
        assert!(!rt.is_local(X));
        assert_eq!(rt.lookup(X).map(|slot| slot.scope), Ok(Scope::Global));
        assert_eq!(rt.get(X), Ok(int(7)));
    }

    #[test]
    fn test_mark_global_redirects_existing_local() {
        let mut rt = runtime(256, false);
        rt.push(None, 0, 0).unwrap();
        rt.set(Y, int(1)).unwrap();
        rt.mark_global(Y).unwrap();

        assert!(rt.is_local(Y));
        assert_eq!(rt.get(Y), Err(FrameError::Unbound(Y)));
        rt.set(Y, int(5)).unwrap();
        assert_eq!(rt.lookup(Y).unwrap().scope, Scope::Global);
        assert_eq!(rt.header(Scope::Local).nvariables, 1);
        assert_eq!(rt.bindings(Scope::Local)[0].value, Value::GLOBAL);
        assert_eq!(rt.get(Y), Ok(int(5)));
    }

    #[test]
    fn test_mark_global_at_top_level_is_noop() {
        let mut rt = runtime(256, false);
        rt.mark_global(X).unwrap();
        assert!(rt.global_frame().is_none());
        assert!(!rt.is_local(X));
    }

    #[test]
    fn test_mark_global_out_of_memory_leaves_frame() {
        // Room for the pushed frame and little else.
        let mut rt = runtime(64, false);
        rt.push(None, 0, 6).unwrap();
        let before = rt.bindings(Scope::Local);

        let err = rt.mark_global(X).unwrap_err();
        assert!(matches!(err, FrameError::OutOfMemory(_)));
        assert!(!rt.is_local(X));
        assert_eq!(rt.bindings(Scope::Local), before);
    }

    #[test]
    fn test_delete_global() {
        let mut rt = runtime(256, false);
        rt.set(X, int(1)).unwrap();
        rt.set(Y, int(2)).unwrap();
        rt.set(Z, int(3)).unwrap();

        rt.delete_global(Y).unwrap();
        assert_eq!(rt.get(Y), Err(FrameError::Unbound(Y)));
        assert_eq!(rt.get(X), Ok(int(1)));
        assert_eq!(rt.get(Z), Ok(int(3)));
        assert_eq!(rt.header(Scope::Global).nvariables, 2);

        assert_eq!(rt.delete_global(Y), Err(FrameError::NotFound(Y)));
        rt.delete_global(X).unwrap();
        rt.delete_global(Z).unwrap();
        assert!(rt.bindings(Scope::Global).is_empty());
        assert!(rt.global_frame().is_some());
    }

    #[test]
    fn test_unnamed_formals_never_resolve() {
        let mut rt = runtime(256, false);
        rt.push(None, 0, 2).unwrap();

        assert!(!rt.is_local(Id::NONE));
        assert_eq!(rt.lookup(Id::NONE), Err(FrameError::Unbound(Id::NONE)));
        assert_eq!(rt.resolve(Id::NONE, false), Err(FrameError::Unbound(Id::NONE)));
        assert_eq!(rt.resolve(Id::NONE, true), Err(FrameError::Unbound(Id::NONE)));
        assert_eq!(rt.set(Id::NONE, int(1)), Err(FrameError::Unbound(Id::NONE)));
        assert_eq!(rt.mark_global(Id::NONE), Err(FrameError::Unbound(Id::NONE)));
        assert_eq!(rt.delete_global(Id::NONE), Err(FrameError::NotFound(Id::NONE)));

        // Nothing was inserted anywhere.
        assert_eq!(rt.header(Scope::Local).nvariables, 2);
        assert!(rt.global_frame().is_none());
        // The slots are still there to be named.
        rt.set_formal(1, X, int(4));
        assert_eq!(
            rt.lookup(X),
            Ok(Slot {
                scope: Scope::Local,
                index: 1
            })
        );
    }

    #[test]
    fn test_delete_global_out_of_memory_leaves_frame() {
        let mut rt = runtime(64, false);
        rt.set(X, int(1)).unwrap();
        rt.set(Y, int(2)).unwrap();
        rt.set(Z, int(3)).unwrap();
        // Globals and this frame fill all but 4 bytes of the pool.
        rt.push(None, 0, 2).unwrap();
        let before = rt.bindings(Scope::Global);

        let err = rt.delete_global(Y).unwrap_err();
        assert!(matches!(err, FrameError::OutOfMemory(_)));
        assert_eq!(rt.bindings(Scope::Global), before);
        assert_eq!(rt.get(Y), Ok(int(2)));

        // Once the frame is gone the smaller copy fits.
        rt.pop();
        rt.delete_global(Y).unwrap();
        assert_eq!(rt.get(Y), Err(FrameError::Unbound(Y)));
        assert_eq!(rt.get(Z), Ok(int(3)));
    }

    #[test]
    fn test_delete_without_globals() {
        let mut rt = runtime(256, false);
        assert_eq!(rt.delete_global(X), Err(FrameError::NotFound(X)));
    }

    #[test]
    fn test_growth_under_gc_stress() {
        let mut rt = runtime(512, true);
        rt.push(None, 0, 0).unwrap();
        for n in 1..=12u16 {
            let text = format!("local {n}");
            let value = rt.alloc_str(&text).unwrap();
            rt.set(Id(n), value).unwrap();
        }
        for n in 1..=12u16 {
            let value = rt.get(Id(n)).unwrap();
            assert_eq!(rt.str_value(value), Some(format!("local {n}").as_str()));
        }
        assert_eq!(rt.header(Scope::Local).nvariables, 12);
    }
}
