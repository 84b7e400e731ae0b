//! Compact tagged values stored in frame bindings.
//!
//! A value is a single 32-bit word. The low three bits carry the tag, the
//! remaining bits carry either a signed integer, a constant, or the pool
//! offset of a referenced object. The all-zero word is the integer `0`,
//! which is what a freshly allocated (zero-filled) binding holds.

use crate::memory::{Offset, RawOffset};
use crate::object::{Code, Str};
use std::fmt;

/// Identifier of a symbol, as produced by the parser's name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u16);

impl Id {
    /// Placeholder id of a formal slot that has not been bound yet.
    pub const NONE: Id = Id(0);
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

const TAG_BITS: u32 = 3;
const TAG_MASK: u32 = (1 << TAG_BITS) - 1;

const TAG_INT: u32 = 0;
const TAG_CONST: u32 = 1;
const TAG_STR: u32 = 2;
const TAG_CODE: u32 = 3;

/// Tagged runtime value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Value(u32);

/// Decoded view of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int(i32),
    None,
    /// Marks a local binding whose real value lives in the global frame.
    Global,
    Str(Offset<Str>),
    Code(Offset<Code>),
}

impl Value {
    pub const INT_MIN: i32 = -(1 << (31 - TAG_BITS));
    pub const INT_MAX: i32 = (1 << (31 - TAG_BITS)) - 1;

    pub const NONE: Value = Value(TAG_CONST);
    /// The global-indirection sentinel.
    pub const GLOBAL: Value = Value((1 << TAG_BITS) | TAG_CONST);

    /// Encodes an integer, or `None` if it does not fit in the payload bits.
    pub fn int(n: i32) -> Option<Value> {
        (Self::INT_MIN..=Self::INT_MAX)
            .contains(&n)
            .then(|| Value(((n as u32) << TAG_BITS) | TAG_INT))
    }

    pub fn str(offset: Offset<Str>) -> Value {
        Value(((offset.raw() as u32) << TAG_BITS) | TAG_STR)
    }

    pub fn code(offset: Offset<Code>) -> Value {
        Value(((offset.raw() as u32) << TAG_BITS) | TAG_CODE)
    }

    /// Rebuilds a value from its stored word.
    pub const fn from_bits(bits: u32) -> Value {
        Value(bits)
    }

    pub const fn to_bits(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> ValueKind {
        match self.0 & TAG_MASK {
            TAG_INT => ValueKind::Int((self.0 as i32) >> TAG_BITS),
            TAG_STR => match Offset::from_raw(self.payload()) {
                Some(offset) => ValueKind::Str(offset),
                None => ValueKind::None,
            },
            TAG_CODE => match Offset::from_raw(self.payload()) {
                Some(offset) => ValueKind::Code(offset),
                None => ValueKind::None,
            },
            _ if self == Self::GLOBAL => ValueKind::Global,
            _ => ValueKind::None,
        }
    }

    pub fn is_global(self) -> bool {
        self == Self::GLOBAL
    }

    pub fn as_int(self) -> Option<i32> {
        match self.kind() {
            ValueKind::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(self) -> Option<Offset<Str>> {
        match self.kind() {
            ValueKind::Str(offset) => Some(offset),
            _ => None,
        }
    }

    pub fn as_code(self) -> Option<Offset<Code>> {
        match self.kind() {
            ValueKind::Code(offset) => Some(offset),
            _ => None,
        }
    }

    /// Pool offset carried by reference values.
    fn payload(self) -> RawOffset {
        (self.0 >> TAG_BITS) as RawOffset
    }

    /// Same value with its referenced offset replaced. Non-references are
    /// returned unchanged.
    pub(crate) fn with_offset(self, offset: RawOffset) -> Value {
        match self.0 & TAG_MASK {
            tag @ (TAG_STR | TAG_CODE) => Value(((offset as u32) << TAG_BITS) | tag),
            _ => self,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Int(n) => write!(f, "Int({n})"),
            ValueKind::None => f.write_str("None"),
            ValueKind::Global => f.write_str("Global"),
            ValueKind::Str(offset) => write!(f, "Str(@{})", offset.raw()),
            ValueKind::Code(offset) => write!(f, "Code(@{})", offset.raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_word_is_int_zero() {
        assert_eq!(Value::default().kind(), ValueKind::Int(0));
        assert_eq!(Value::from_bits(0).as_int(), Some(0));
    }

    #[test]
    fn test_int_range() {
        assert_eq!(Value::int(-5).and_then(Value::as_int), Some(-5));
        assert_eq!(
            Value::int(Value::INT_MAX).and_then(Value::as_int),
            Some(Value::INT_MAX)
        );
        assert_eq!(
            Value::int(Value::INT_MIN).and_then(Value::as_int),
            Some(Value::INT_MIN)
        );
        assert!(Value::int(Value::INT_MAX + 1).is_none());
        assert!(Value::int(Value::INT_MIN - 1).is_none());
    }

    #[test]
    fn test_sentinel_is_distinct() {
        assert!(Value::GLOBAL.is_global());
        assert!(!Value::NONE.is_global());
        assert_ne!(Value::GLOBAL.kind(), ValueKind::None);
        assert_eq!(Value::GLOBAL.as_int(), None);
    }

    #[test]
    fn test_references() {
        let code = Offset::<Code>::from_raw(40).unwrap();
        let v = Value::code(code);
        assert_eq!(v.as_code(), Some(code));
        assert_eq!(v.as_str(), None);

        let moved = v.with_offset(12);
        assert_eq!(moved.as_code().map(Offset::raw), Some(12));
        assert_eq!(Value::int(3).unwrap().with_offset(12).as_int(), Some(3));
    }
}
