//! Values: typed, possibly constant, possibly temporary.

use anvil_entity::entity_impl;

use crate::ir::types::{ConstData, Type};

/// An opaque reference to a value in a function body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// Kind bits for a value.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueFlags(u16);

impl ValueFlags {
    /// No flags.
    pub const NONE: ValueFlags = ValueFlags(0);
    /// The value is a build-time constant.
    pub const CONSTANT: ValueFlags = ValueFlags(0x001);
    /// The value is a compiler temporary.
    pub const TEMPORARY: ValueFlags = ValueFlags(0x002);
    /// The value is a local variable (or a temporary that behaves as one).
    pub const LOCAL: ValueFlags = ValueFlags(0x004);
    /// The value is an incoming parameter.
    pub const PARAMETER: ValueFlags = ValueFlags(0x008);
    /// The parameter arrives in a register.
    pub const REG_PARAMETER: ValueFlags = ValueFlags(0x010);
    /// The value must be re-read around every operation.
    pub const VOLATILE: ValueFlags = ValueFlags(0x020);
    /// The value's address has been taken; it needs a stable frame slot and
    /// must never live only in a register across aliasing operations.
    pub const ADDRESSABLE: ValueFlags = ValueFlags(0x040);
    /// A frame slot has been assigned.
    pub const HAS_FRAME_OFFSET: ValueFlags = ValueFlags(0x080);
    /// The value is pinned to a global register for its whole lifetime.
    pub const GLOBAL_REG: ValueFlags = ValueFlags(0x100);

    /// Test whether all bits of `other` are set.
    pub fn contains(self, other: ValueFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set all bits of `other`.
    pub fn insert(&mut self, other: ValueFlags) {
        self.0 |= other.0;
    }

    /// Clear all bits of `other`.
    pub fn remove(&mut self, other: ValueFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for ValueFlags {
    type Output = ValueFlags;

    fn bitor(self, rhs: ValueFlags) -> ValueFlags {
        ValueFlags(self.0 | rhs.0)
    }
}

/// The data backing a value handle.
#[derive(Clone)]
pub struct ValueData {
    /// The value's type.
    pub ty: Type,
    /// Kind bits.
    pub flags: ValueFlags,
    /// Constant payload, present when `CONSTANT` is set.
    pub konst: Option<ConstData>,
    /// Register currently holding the value, if any.
    pub reg: Option<u8>,
    /// Global register pinning, if any.
    pub global_reg: Option<u8>,
    /// Frame offset relative to the frame pointer, negative growing down.
    pub frame_offset: i32,
    /// Usage count maintained by the builder; the register assignment
    /// strategy uses it to rank candidates.
    pub usage_count: u32,
}

impl ValueData {
    /// A new non-constant value of the given type.
    pub fn new(ty: Type) -> ValueData {
        ValueData {
            ty,
            flags: ValueFlags::NONE,
            konst: None,
            reg: None,
            global_reg: None,
            frame_offset: 0,
            usage_count: 0,
        }
    }

    /// A new constant value.
    pub fn constant(ty: Type, konst: ConstData) -> ValueData {
        ValueData {
            ty,
            flags: ValueFlags::CONSTANT,
            konst: Some(konst),
            reg: None,
            global_reg: None,
            frame_offset: 0,
            usage_count: 0,
        }
    }

    /// Is this value a build-time constant?
    pub fn is_constant(&self) -> bool {
        self.flags.contains(ValueFlags::CONSTANT)
    }

    /// Is this a pointer-sized integer constant? Returns its payload.
    pub fn nint_constant(&self) -> Option<i64> {
        if !self.is_constant() {
            return None;
        }
        self.konst.as_ref().and_then(|c| c.as_int())
    }

    /// Is this constant value non-zero?
    pub fn is_true(&self) -> bool {
        self.konst.as_ref().map_or(false, |c| c.is_true())
    }

    /// Does this value have a stable frame slot assigned?
    pub fn has_frame_offset(&self) -> bool {
        self.flags.contains(ValueFlags::HAS_FRAME_OFFSET)
    }
}
