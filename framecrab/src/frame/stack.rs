//! The call stack: pushing and popping call frames.

use super::{Binding, Frame, FrameHeader, RawBinding, Scope, binding_at, frame_size};
use crate::error::FrameError;
use crate::memory::Offset;
use crate::object::Code;
use crate::runtime::Runtime;
use crate::value::{Id, Value};
use tracing::debug;

/// Where execution continues after a frame is popped.
///
/// `code` is a snapshot offset; the caller must link it somewhere the
/// collector can see before the next allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resume {
    pub code: Option<Offset<Code>>,
    pub resume_point: u16,
}

impl Runtime {
    /// Pushes a call frame with `nformal` bindings and makes it current.
    ///
    /// `code` and `resume_point` are handed back by the matching [`pop`].
    /// The formal bindings start out unnamed (`Id::NONE`) and must be filled
    /// in with [`set_formal`] before the frame is used for lookups. On
    /// failure the call stack is unchanged.
    ///
    /// [`pop`]: Runtime::pop
    /// [`set_formal`]: Runtime::set_formal
    pub fn push(
        &mut self,
        code: Option<Offset<Code>>,
        resume_point: u16,
        nformal: u16,
    ) -> Result<Offset<Frame>, FrameError> {
        // Nothing links the code object yet, so it has to ride in the stash
        // across the allocation.
        self.pool.stash(code.map_or(Value::NONE, Value::code));
        let frame = self.alloc_object::<Frame>(frame_size(nformal));
        let code = self.pool.unstash().as_code();
        let frame = frame?;

        self.pool.write(
            frame.raw() as usize,
            &FrameHeader {
                nvariables: nformal,
                code: Offset::raw_or_null(code),
                ip: resume_point,
                prev: Offset::raw_or_null(self.roots.current),
            },
        );
        self.roots.current = Some(frame);
        debug!(
            "Pushed frame @{} ({} formals, resume at {})",
            frame.raw(),
            nformal,
            resume_point
        );
        Ok(frame)
    }

    /// Names formal `index` of the current frame and gives it a value.
    ///
    /// # Panics
    /// If there is no call frame or `index` is not a formal slot.
    pub fn set_formal(&mut self, index: u16, id: Id, value: Value) {
        let frame = self.frame(Scope::Local);
        let nvariables = self.header(Scope::Local).nvariables;
        assert!(
            index < nvariables,
            "Formal {} out of range for a frame of {} bindings",
            index,
            nvariables
        );
        self.pool.write(
            binding_at(frame.raw(), index),
            &RawBinding::from(Binding { id, value }),
        );
    }

    /// Pops the current call frame.
    ///
    /// # Returns
    /// * `Some(Resume)` - The code and resume point saved by `push`
    /// * `None` - The call stack is empty (a top-level return)
    pub fn pop(&mut self) -> Option<Resume> {
        let frame = self.roots.current?;
        let header = self.header(Scope::Local);
        self.roots.current = Offset::from_raw(header.prev);
        debug!("Popped frame @{}, resume at {}", frame.raw(), header.ip);
        Some(Resume {
            code: Offset::from_raw(header.code),
            resume_point: header.ip,
        })
    }

    /// Number of call frames on the stack.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self.roots.current;
        while let Some(offset) = frame {
            depth += 1;
            frame = Offset::from_raw(self.pool.read::<FrameHeader>(offset.raw() as usize).prev);
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn runtime(pool_size: u16, gc_stress: bool) -> Runtime {
        Runtime::new(
            PoolConfig::default()
                .with_pool_size(pool_size)
                .with_gc_stress(gc_stress),
        )
        .unwrap()
    }

    #[test]
    fn test_pop_empty() {
        let mut rt = runtime(128, false);
        assert_eq!(rt.pop(), None);
        assert_eq!(rt.depth(), 0);
        assert_eq!(rt.stats().allocations, 0);
    }

    #[test]
    fn test_push_pop_order() {
        let mut rt = runtime(256, false);
        for ip in 1..=4 {
            rt.push(None, ip * 10, 0).unwrap();
        }
        assert_eq!(rt.depth(), 4);
        for ip in (1..=4).rev() {
            let resume = rt.pop().unwrap();
            assert_eq!(resume.resume_point, ip * 10);
            assert_eq!(resume.code, None);
        }
        assert_eq!(rt.pop(), None);
        assert!(rt.current_frame().is_none());
    }

    #[test]
    fn test_push_keeps_code_alive() {
        let mut rt = runtime(64, false);
        // Garbage below the code object fills the pool, so push has to
        // collect and the code object slides down.
        rt.alloc_str(&"x".repeat(30)).unwrap();
        let code = rt.alloc_code(b"\x01\x02\x03").unwrap();

        rt.push(Some(code), 7, 2).unwrap();
        assert_eq!(rt.stats().collections, 1);
        let resume = rt.pop().unwrap();
        let moved = resume.code.unwrap();
        assert_ne!(moved, code);
        assert_eq!(rt.code_bytes(moved), b"\x01\x02\x03");
        assert_eq!(resume.resume_point, 7);
    }

    #[test]
    fn test_formals() {
        let mut rt = runtime(256, false);
        rt.push(None, 0, 2).unwrap();
        assert!(!rt.is_local(Id(1)));
        rt.set_formal(0, Id(1), Value::int(10).unwrap());
        rt.set_formal(1, Id(2), Value::int(20).unwrap());

        assert!(rt.is_local(Id(1)));
        assert_eq!(rt.get(Id(2)), Ok(Value::int(20).unwrap()));
        assert_eq!(rt.bindings(Scope::Local).len(), 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_formal_out_of_range() {
        let mut rt = runtime(256, false);
        rt.push(None, 0, 1).unwrap();
        rt.set_formal(1, Id(1), Value::NONE);
    }

    #[test]
    fn test_failed_push_leaves_stack() {
        let mut rt = runtime(64, false);
        let first = rt.push(None, 1, 2).unwrap();
        let err = rt.push(None, 2, 8).unwrap_err();
        assert!(matches!(err, FrameError::OutOfMemory(_)));
        assert_eq!(rt.current_frame(), Some(first));
        assert_eq!(rt.depth(), 1);
        assert_eq!(rt.pop().map(|resume| resume.resume_point), Some(1));
    }

    #[test]
    fn test_popped_frames_are_reclaimed() {
        let mut rt = runtime(128, false);
        rt.push(None, 0, 3).unwrap();
        rt.push(None, 0, 3).unwrap();
        rt.pop();
        rt.pop();
        rt.collect();
        assert_eq!(rt.stats().used, 0);
    }

    #[test]
    fn test_chain_survives_collection() {
        let mut rt = runtime(512, false);
        for depth in 1..=5u16 {
            rt.push(None, depth, 1).unwrap();
            let text = rt.alloc_str(&format!("frame {depth}")).unwrap();
            rt.set_formal(0, Id(1), text);
            // Leave garbage between frames.
            rt.alloc_str("filler").unwrap();
        }
        rt.collect();
        rt.collect();

        for depth in (1..=5u16).rev() {
            let value = rt.get(Id(1)).unwrap();
            assert_eq!(rt.str_value(value), Some(format!("frame {depth}").as_str()));
            assert_eq!(rt.pop().unwrap().resume_point, depth);
        }
    }
}
