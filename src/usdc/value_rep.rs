//! Packed 64-bit value representations.
//!
//! Bit 63 marks arrays, bit 62 inlined payloads and bit 61 compressed
//! arrays. Bits 48..56 hold the [`TypeId`]; the low 48 bits are either
//! the inlined payload or the file offset of the out-of-line data.

use std::fmt;

const ARRAY_BIT: u64 = 1 << 63;
const INLINED_BIT: u64 = 1 << 62;
const COMPRESSED_BIT: u64 = 1 << 61;
const PAYLOAD_MASK: u64 = (1 << 48) - 1;

/// Crate value type ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    Bool = 1,
    UChar = 2,
    Int = 3,
    UInt = 4,
    Int64 = 5,
    UInt64 = 6,
    Half = 7,
    Float = 8,
    Double = 9,
    String = 10,
    Token = 11,
    AssetPath = 12,
    Matrix4d = 15,
    Quatf = 17,
    Vec2f = 20,
    Vec3d = 23,
    Vec3f = 24,
    Vec3h = 25,
    Vec4f = 28,
    Dictionary = 31,
    TokenListOp = 32,
    PathListOp = 34,
    ReferenceListOp = 35,
    PathVector = 40,
    TokenVector = 41,
    Specifier = 42,
    Variability = 44,
    TimeSamples = 46,
    DoubleVector = 48,
    ValueBlock = 51,
}

impl TypeId {
    pub fn from_u8(v: u8) -> Option<Self> {
        use TypeId::*;
        Some(match v {
            1 => Bool,
            2 => UChar,
            3 => Int,
            4 => UInt,
            5 => Int64,
            6 => UInt64,
            7 => Half,
            8 => Float,
            9 => Double,
            10 => String,
            11 => Token,
            12 => AssetPath,
            15 => Matrix4d,
            17 => Quatf,
            20 => Vec2f,
            23 => Vec3d,
            24 => Vec3f,
            25 => Vec3h,
            28 => Vec4f,
            31 => Dictionary,
            32 => TokenListOp,
            34 => PathListOp,
            35 => ReferenceListOp,
            40 => PathVector,
            41 => TokenVector,
            42 => Specifier,
            44 => Variability,
            46 => TimeSamples,
            48 => DoubleVector,
            51 => ValueBlock,
            _ => return None,
        })
    }
}

/// One packed value reference as stored in the FIELDS section.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRep(pub u64);

impl ValueRep {
    /// An inlined payload of `ty`.
    pub fn inlined(ty: TypeId, payload: u64) -> Self {
        Self(INLINED_BIT | ((ty as u64) << 48) | (payload & PAYLOAD_MASK))
    }

    /// Out-of-line data of `ty` at file offset `offset`.
    pub fn at(ty: TypeId, offset: u64) -> Self {
        Self(((ty as u64) << 48) | (offset & PAYLOAD_MASK))
    }

    /// An array of `ty` at `offset`; offset 0 encodes the empty array.
    pub fn array(ty: TypeId, offset: u64, compressed: bool) -> Self {
        let mut bits = ARRAY_BIT | ((ty as u64) << 48) | (offset & PAYLOAD_MASK);
        if compressed {
            bits |= COMPRESSED_BIT;
        }
        Self(bits)
    }

    #[inline]
    pub fn is_array(self) -> bool {
        self.0 & ARRAY_BIT != 0
    }

    #[inline]
    pub fn is_inlined(self) -> bool {
        self.0 & INLINED_BIT != 0
    }

    #[inline]
    pub fn is_compressed(self) -> bool {
        self.0 & COMPRESSED_BIT != 0
    }

    #[inline]
    pub fn type_byte(self) -> u8 {
        ((self.0 >> 48) & 0xff) as u8
    }

    pub fn type_id(self) -> Option<TypeId> {
        TypeId::from_u8(self.type_byte())
    }

    #[inline]
    pub fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Same flags and type with the payload moved by `base` bytes.
    pub fn relocated(self, base: u64) -> Self {
        Self((self.0 & !PAYLOAD_MASK) | ((self.payload() + base) & PAYLOAD_MASK))
    }
}

impl fmt::Debug for ValueRep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRep")
            .field("type", &self.type_byte())
            .field("array", &self.is_array())
            .field("inlined", &self.is_inlined())
            .field("compressed", &self.is_compressed())
            .field("payload", &self.payload())
            .finish()
    }
}

/// List operation header bits.
pub mod list_op {
    pub const MAKE_EXPLICIT: u8 = 1 << 0;
    pub const HAS_EXPLICIT: u8 = 1 << 1;
    pub const HAS_ADDED: u8 = 1 << 2;
    pub const HAS_DELETED: u8 = 1 << 3;
    pub const HAS_ORDERED: u8 = 1 << 4;
    pub const HAS_PREPENDED: u8 = 1 << 5;
    pub const HAS_APPENDED: u8 = 1 << 6;
}

/// Spec kinds stored in the SPECS section.
pub mod spec_type {
    pub const ATTRIBUTE: u32 = 1;
    pub const PRIM: u32 = 6;
    pub const PSEUDO_ROOT: u32 = 7;
    pub const RELATIONSHIP: u32 = 8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits() {
        let rep = ValueRep::inlined(TypeId::Float, 1.5f32.to_bits() as u64);
        assert!(rep.is_inlined());
        assert!(!rep.is_array());
        assert_eq!(rep.type_id(), Some(TypeId::Float));
        assert_eq!(f32::from_bits(rep.payload() as u32), 1.5);

        let rep = ValueRep::array(TypeId::Int, 4096, true);
        assert!(rep.is_array() && rep.is_compressed() && !rep.is_inlined());
        assert_eq!(rep.relocated(100).payload(), 4196);
        assert!(rep.relocated(100).is_compressed());

        assert_eq!(ValueRep::array(TypeId::Vec3f, 0, false).payload(), 0);
    }

    #[test]
    fn test_type_ids() {
        for id in [TypeId::Token, TypeId::TimeSamples, TypeId::ValueBlock, TypeId::Vec3h] {
            assert_eq!(TypeId::from_u8(id as u8), Some(id));
        }
        assert_eq!(TypeId::from_u8(99), None);
    }
}
