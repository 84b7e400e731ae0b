//! FrameCrab
//!
//! Call frames and variable scopes for small-memory script runtimes whose
//! objects live in a single compacting pool.
//!
//! Frames are ordinary pool objects that the collector may move at any
//! allocation. The frame manager therefore never keeps an address across an
//! allocation: it names frames by [`Offset`], grows and shrinks them by
//! allocating a replacement and copying over from whatever the roots name
//! afterwards, and hands out [`Slot`]s that are re-derived from the roots on
//! every access.
//!
//! ```
//! use framecrab::{Id, PoolConfig, Runtime, Value};
//!
//! let mut rt = Runtime::new(PoolConfig::default())?;
//! rt.push(None, 0, 0)?;
//! rt.mark_global(Id(2))?;
//! rt.set(Id(2), Value::int(5).unwrap())?;
//! rt.pop();
//! assert_eq!(rt.get(Id(2))?, Value::int(5).unwrap());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod error;
mod frame;
pub mod memory;
mod object;
pub mod runner;
mod runtime;
pub mod value;

pub use config::PoolConfig;
pub use error::{FrameError, PoolError};
pub use frame::{Binding, Frame, Resume, Scope, Slot};
pub use memory::{Offset, PoolStats};
pub use object::{Code, Str};
pub use runtime::Runtime;
pub use value::{Id, Value, ValueKind};
