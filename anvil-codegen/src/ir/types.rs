//! The IR type system.
//!
//! Scalar kinds follow the machine's view of the world: explicit widths for
//! integers, IEEE singles and doubles, and `NFloat` for the x87 extended
//! format. `NInt`/`NUInt` are pointer-sized and normalize to a fixed-width
//! kind once a target is chosen. Aggregates carry a complete field layout
//! behind a shared immutable `StructLayout`, which is all the ABI classifier
//! needs.

use std::fmt;
use std::sync::Arc;

use crate::ir::sig::SigData;

/// Pointer width of the compilation target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtrWidth {
    /// 32-bit target (x86).
    P32,
    /// 64-bit target (x86-64).
    P64,
}

impl PtrWidth {
    /// Size of a pointer in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            PtrWidth::P32 => 4,
            PtrWidth::P64 => 8,
        }
    }
}

/// Whether `NFloat` shares a representation with `Float64` on the targets we
/// support. Both x86 and x86-64 have the x87 unit, so the extended 80-bit
/// format is real and spill paths must use the tbyte forms.
pub const NFLOAT_IS_F64: bool = false;

/// The kind of a type, used for dispatch tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// No value.
    Void,
    /// Signed 8-bit integer.
    SByte,
    /// Unsigned 8-bit integer.
    UByte,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit integer.
    UShort,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Pointer-sized signed integer.
    NInt,
    /// Pointer-sized unsigned integer.
    NUInt,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    ULong,
    /// IEEE single precision.
    Float32,
    /// IEEE double precision.
    Float64,
    /// Native extended precision (x87 80-bit).
    NFloat,
    /// Untyped pointer.
    Ptr,
    /// Structure with a field layout.
    Struct,
    /// Union (overlapping field layout).
    Union,
    /// Function signature used as a value type (function pointers).
    Signature,
}

/// A type in the IR.
///
/// Scalars are plain variants; aggregates and signatures share their layout
/// through an `Arc` so that cloning a type is cheap and layouts can be
/// reused across functions.
#[derive(Clone)]
pub enum Type {
    /// No value.
    Void,
    /// Signed 8-bit integer.
    SByte,
    /// Unsigned 8-bit integer.
    UByte,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit integer.
    UShort,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Pointer-sized signed integer.
    NInt,
    /// Pointer-sized unsigned integer.
    NUInt,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    ULong,
    /// IEEE single precision.
    Float32,
    /// IEEE double precision.
    Float64,
    /// Native extended precision float.
    NFloat,
    /// Untyped pointer.
    Ptr,
    /// Structure or union with a computed layout.
    Aggregate(Arc<StructLayout>),
    /// A function signature (the type of a function pointer).
    Sig(Arc<SigData>),
}

/// One field of an aggregate layout.
#[derive(Clone, Debug)]
pub struct Field {
    /// Byte offset of the field from the start of the aggregate.
    pub offset: u32,
    /// The field's type.
    pub ty: Type,
}

/// Size, alignment and field placement of a struct or union.
#[derive(Clone, Debug)]
pub struct StructLayout {
    /// Total size in bytes, including tail padding.
    pub size: u32,
    /// Required alignment in bytes.
    pub align: u32,
    /// Fields in declaration order.
    pub fields: Vec<Field>,
    /// Unions overlap all fields at offset zero.
    pub is_union: bool,
}

impl StructLayout {
    /// Compute a C-compatible struct layout from field types.
    pub fn new_struct(field_types: &[Type], width: PtrWidth) -> Arc<StructLayout> {
        let mut size = 0u32;
        let mut align = 1u32;
        let mut fields = Vec::with_capacity(field_types.len());
        for ty in field_types {
            let fa = ty.align(width).max(1);
            let fs = ty.size(width);
            size = (size + fa - 1) & !(fa - 1);
            fields.push(Field {
                offset: size,
                ty: ty.clone(),
            });
            size += fs;
            align = align.max(fa);
        }
        size = (size + align - 1) & !(align - 1);
        Arc::new(StructLayout {
            size,
            align,
            fields,
            is_union: false,
        })
    }

    /// Compute a C-compatible union layout from member types.
    pub fn new_union(member_types: &[Type], width: PtrWidth) -> Arc<StructLayout> {
        let mut size = 0u32;
        let mut align = 1u32;
        let mut fields = Vec::with_capacity(member_types.len());
        for ty in member_types {
            size = size.max(ty.size(width));
            align = align.max(ty.align(width).max(1));
            fields.push(Field {
                offset: 0,
                ty: ty.clone(),
            });
        }
        size = (size + align - 1) & !(align - 1);
        Arc::new(StructLayout {
            size,
            align,
            fields,
            is_union: true,
        })
    }

    /// An opaque blob with an explicit size and alignment and no visible
    /// fields. Used for runtime-defined values like the unwind buffer.
    pub fn opaque(size: u32, align: u32) -> Arc<StructLayout> {
        Arc::new(StructLayout {
            size,
            align,
            fields: Vec::new(),
            is_union: false,
        })
    }
}

impl Type {
    /// The kind of this type.
    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Void => TypeKind::Void,
            Type::SByte => TypeKind::SByte,
            Type::UByte => TypeKind::UByte,
            Type::Short => TypeKind::Short,
            Type::UShort => TypeKind::UShort,
            Type::Int => TypeKind::Int,
            Type::UInt => TypeKind::UInt,
            Type::NInt => TypeKind::NInt,
            Type::NUInt => TypeKind::NUInt,
            Type::Long => TypeKind::Long,
            Type::ULong => TypeKind::ULong,
            Type::Float32 => TypeKind::Float32,
            Type::Float64 => TypeKind::Float64,
            Type::NFloat => TypeKind::NFloat,
            Type::Ptr => TypeKind::Ptr,
            Type::Aggregate(layout) => {
                if layout.is_union {
                    TypeKind::Union
                } else {
                    TypeKind::Struct
                }
            }
            Type::Sig(_) => TypeKind::Signature,
        }
    }

    /// Size of a value of this type in bytes on the given target.
    pub fn size(&self, width: PtrWidth) -> u32 {
        match self {
            Type::Void => 0,
            Type::SByte | Type::UByte => 1,
            Type::Short | Type::UShort => 2,
            Type::Int | Type::UInt | Type::Float32 => 4,
            Type::Long | Type::ULong | Type::Float64 => 8,
            // The x87 extended format stores as 10 bytes but is padded to
            // its natural slot size in memory.
            Type::NFloat => match width {
                PtrWidth::P32 => 12,
                PtrWidth::P64 => 16,
            },
            Type::NInt | Type::NUInt | Type::Ptr | Type::Sig(_) => width.bytes(),
            Type::Aggregate(layout) => layout.size,
        }
    }

    /// Natural alignment of this type in bytes on the given target.
    pub fn align(&self, width: PtrWidth) -> u32 {
        match self {
            Type::Aggregate(layout) => layout.align,
            Type::NFloat => match width {
                PtrWidth::P32 => 4,
                PtrWidth::P64 => 16,
            },
            Type::Void => 1,
            _ => self.size(width),
        }
    }

    /// Replace pointer-sized kinds with their fixed-width equivalents for
    /// the given target. Aggregates and signatures are left alone.
    pub fn normalize(&self, width: PtrWidth) -> Type {
        match (self, width) {
            (Type::NInt, PtrWidth::P32) => Type::Int,
            (Type::NUInt, PtrWidth::P32) => Type::UInt,
            (Type::Ptr, PtrWidth::P32) | (Type::Sig(_), PtrWidth::P32) => Type::UInt,
            (Type::NInt, PtrWidth::P64) => Type::Long,
            (Type::NUInt, PtrWidth::P64) => Type::ULong,
            (Type::Ptr, PtrWidth::P64) | (Type::Sig(_), PtrWidth::P64) => Type::ULong,
            _ => self.clone(),
        }
    }

    /// Integer promotion: sub-word integers widen to `Int`.
    pub fn promote_int(&self) -> Type {
        match self {
            Type::SByte | Type::Short => Type::Int,
            Type::UByte | Type::UShort => Type::Int,
            _ => self.clone(),
        }
    }

    /// Is this one of the integer kinds (after normalization)?
    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::SByte
                | TypeKind::UByte
                | TypeKind::Short
                | TypeKind::UShort
                | TypeKind::Int
                | TypeKind::UInt
                | TypeKind::NInt
                | TypeKind::NUInt
                | TypeKind::Long
                | TypeKind::ULong
        )
    }

    /// Is this one of the float kinds?
    pub fn is_float(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::Float32 | TypeKind::Float64 | TypeKind::NFloat
        )
    }

    /// Is this a struct or union?
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Aggregate(_))
    }

    /// The aggregate layout, if this is a struct or union.
    pub fn layout(&self) -> Option<&Arc<StructLayout>> {
        match self {
            Type::Aggregate(layout) => Some(layout),
            _ => None,
        }
    }

    /// The signature data, if this is a signature type.
    pub fn signature(&self) -> Option<&Arc<SigData>> {
        match self {
            Type::Sig(sig) => Some(sig),
            _ => None,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Aggregate(a), Type::Aggregate(b)) => Arc::ptr_eq(a, b),
            (Type::Sig(a), Type::Sig(b)) => Arc::ptr_eq(a, b),
            _ => self.kind() == other.kind(),
        }
    }
}

impl Eq for Type {}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Aggregate(layout) if layout.is_union => {
                write!(f, "union{{size={}}}", layout.size)
            }
            Type::Aggregate(layout) => write!(f, "struct{{size={}}}", layout.size),
            Type::Sig(_) => write!(f, "sig"),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// An inline constant payload attached to a constant value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstData {
    /// A 32-bit (or narrower) integer constant.
    Int(i32),
    /// A 64-bit integer constant.
    Long(i64),
    /// A pointer-sized integer or address constant.
    NInt(i64),
    /// A single precision constant.
    Float32(f32),
    /// A double precision constant.
    Float64(f64),
    /// A native extended precision constant. Build-time arithmetic is done
    /// in double precision; only the spill format is extended.
    NFloat(f64),
}

impl ConstData {
    /// Is this constant non-zero, as a branch condition would see it?
    pub fn is_true(&self) -> bool {
        match *self {
            ConstData::Int(v) => v != 0,
            ConstData::Long(v) | ConstData::NInt(v) => v != 0,
            ConstData::Float32(v) => v != 0.0,
            ConstData::Float64(v) | ConstData::NFloat(v) => v != 0.0,
        }
    }

    /// The constant widened to an `i64`, if it is an integer kind.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            ConstData::Int(v) => Some(v as i64),
            ConstData::Long(v) | ConstData::NInt(v) => Some(v),
            _ => None,
        }
    }

    /// The constant as a double, if it is a float kind.
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            ConstData::Float32(v) => Some(v as f64),
            ConstData::Float64(v) | ConstData::NFloat(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_subword() {
        assert_eq!(Type::SByte.promote_int().kind(), TypeKind::Int);
        assert_eq!(Type::UShort.promote_int().kind(), TypeKind::Int);
        assert_eq!(Type::UInt.promote_int().kind(), TypeKind::UInt);
        assert_eq!(Type::Long.promote_int().kind(), TypeKind::Long);
    }

    #[test]
    fn normalize_pointers() {
        assert_eq!(Type::Ptr.normalize(PtrWidth::P64).kind(), TypeKind::ULong);
        assert_eq!(Type::NInt.normalize(PtrWidth::P64).kind(), TypeKind::Long);
        assert_eq!(Type::Ptr.normalize(PtrWidth::P32).kind(), TypeKind::UInt);
    }

    #[test]
    fn struct_layout_padding() {
        // { i8, i32, i8 } lays out as 0, 4, 8 with size 12 align 4.
        let layout =
            StructLayout::new_struct(&[Type::SByte, Type::Int, Type::SByte], PtrWidth::P64);
        assert_eq!(layout.fields[0].offset, 0);
        assert_eq!(layout.fields[1].offset, 4);
        assert_eq!(layout.fields[2].offset, 8);
        assert_eq!(layout.size, 12);
        assert_eq!(layout.align, 4);
    }

    #[test]
    fn union_layout() {
        let layout = StructLayout::new_union(&[Type::Int, Type::Float64], PtrWidth::P64);
        assert_eq!(layout.size, 8);
        assert_eq!(layout.align, 8);
        assert!(layout.is_union);
    }
}
