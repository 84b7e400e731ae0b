//! Error types reported by the pool and the frame manager.

use crate::value::Id;
use thiserror::Error;

/// Failure of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The request could not be satisfied even after a full collection.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
}

/// Failure of a frame manager operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A frame could not be allocated or grown. Roots are left untouched.
    #[error(transparent)]
    OutOfMemory(#[from] PoolError),
    /// Resolution failed and insertion was not allowed.
    #[error("name {0} is not defined")]
    Unbound(Id),
    /// The global to delete does not exist.
    #[error("global {0} not found")]
    NotFound(Id),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let oom = PoolError::OutOfMemory {
            requested: 24,
            available: 8,
        };
        assert_eq!(
            oom.to_string(),
            "out of memory: requested 24 bytes, 8 available"
        );
        assert_eq!(FrameError::from(oom).to_string(), oom.to_string());
        assert_eq!(FrameError::Unbound(Id(7)).to_string(), "name #7 is not defined");
        assert_eq!(FrameError::NotFound(Id(3)).to_string(), "global #3 not found");
    }
}
