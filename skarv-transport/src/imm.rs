//! ## skarv-transport::imm
//! **Immediate-value message packing**
//!
//! Buffer replenishment requests travel as a single 32-bit immediate
//! value: `kind:2 | source:6 | index:24`, most significant bits first.
//! Source ids share the 0..64 range of the contributor mask; the index is
//! a buffer slot number at the requester.

const INDEX_BITS: u32 = 24;
const SOURCE_BITS: u32 = 6;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const SOURCE_MASK: u32 = (1 << SOURCE_BITS) - 1;

/// Payload-kind flag carried in the top two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ImmKind {
    /// The value names a buffer slot offered to the upstream producer.
    Buffer = 0,
    /// The value accompanies a run transition.
    Transition = 1,
}

impl ImmKind {
    pub fn from_u32(value: u32) -> Option<ImmKind> {
        match value {
            0 => Some(ImmKind::Buffer),
            1 => Some(ImmKind::Transition),
            _ => None,
        }
    }
}

/// Packed immediate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmValue(u32);

impl ImmValue {
    pub fn pack(kind: ImmKind, source: u32, index: u32) -> Self {
        Self(
            (kind as u32) << (SOURCE_BITS + INDEX_BITS)
                | (source & SOURCE_MASK) << INDEX_BITS
                | (index & INDEX_MASK),
        )
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn kind(&self) -> Option<ImmKind> {
        ImmKind::from_u32(self.0 >> (SOURCE_BITS + INDEX_BITS))
    }

    pub fn source(&self) -> u32 {
        (self.0 >> INDEX_BITS) & SOURCE_MASK
    }

    pub fn index(&self) -> u32 {
        self.0 & INDEX_MASK
    }
}
