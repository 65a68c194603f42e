//! ## skarv-codec::node
//! **Container node header codec plus arena views and writers**
//!
//! The wire shape of a node is `damage:u32 | src:u64 | contains:u32 |
//! extent:u32`, little-endian, followed immediately by `extent - 20`
//! payload bytes. `extent` spans from the node's own header start through
//! the end of the last child appended so far, so the next sibling always
//! starts at `offset + extent`.
//!
//! The writer keeps a stack of open nodes; every `alloc` grows the extent
//! of each open node by exactly the allocated size, which keeps the
//! containment invariant (`[offset, offset + extent)` covers every
//! descendant) true at all times.

use thiserror::Error;

use crate::damage::Damage;
use crate::source::Src;

/// Byte size of one node header on the wire.
pub const HEADER_SIZE: usize = 20;

/// Errors from decoding or building container trees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated container: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    /// Growth would run past the end of the slot. Callers treat this as
    /// fatal: the copy that would follow corrupts a neighboring slot.
    #[error("allocation of {needed} bytes exceeds slot capacity {capacity}")]
    SlotOverflow { needed: usize, capacity: usize },
    #[error("node extent {extent} is smaller than the header size")]
    MalformedExtent { extent: u32 },
    #[error("no open node to allocate into")]
    NoOpenNode,
    #[error("root node already open")]
    RootAlreadyOpen,
    #[error("container finished with unclosed child nodes")]
    UnclosedChild,
    #[error("unknown transition tag {0}")]
    UnknownTransition(u32),
}

/// Semantic kind of a node's payload, stored in the low half of the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Kind {
    /// Payload is a sequence of nested nodes.
    Parent = 0,
    /// Payload is opaque bytes owned by the producing endpoint.
    Raw = 1,
}

impl Kind {
    pub fn from_u16(value: u16) -> Option<Kind> {
        match value {
            0 => Some(Kind::Parent),
            1 => Some(Kind::Raw),
            _ => None,
        }
    }
}

/// Compact `(kind, version)` tag identifying what a node's payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeId(u32);

impl TypeId {
    pub fn new(kind: Kind, version: u16) -> Self {
        Self((version as u32) << 16 | kind as u32)
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn kind(&self) -> Option<Kind> {
        Kind::from_u16((self.0 & 0xffff) as u16)
    }

    pub fn version(&self) -> u16 {
        (self.0 >> 16) as u16
    }
}

/// Decoded node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub damage: Damage,
    pub src: Src,
    pub contains: TypeId,
    pub extent: u32,
}

impl NodeHeader {
    /// A fresh node with no payload: extent equals the header size.
    pub fn new(contains: TypeId, src: Src) -> Self {
        Self {
            damage: Damage::none(),
            src,
            contains,
            extent: HEADER_SIZE as u32,
        }
    }

    /// Clone identity, discard children: same damage, source and tag, with
    /// the extent reset to an empty node.
    pub fn clone_identity(&self) -> Self {
        Self {
            extent: HEADER_SIZE as u32,
            ..*self
        }
    }

    pub fn payload_size(&self) -> usize {
        self.extent as usize - HEADER_SIZE
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        buf[0..4].copy_from_slice(&self.damage.bits().to_le_bytes());
        buf[4..8].copy_from_slice(&self.src.log().to_le_bytes());
        buf[8..12].copy_from_slice(&self.src.value().to_le_bytes());
        buf[12..16].copy_from_slice(&self.contains.raw().to_le_bytes());
        buf[16..20].copy_from_slice(&self.extent.to_le_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        let word = |range: std::ops::Range<usize>| {
            u32::from_le_bytes(buf[range].try_into().expect("4-byte range"))
        };
        let extent = word(16..20);
        if (extent as usize) < HEADER_SIZE {
            return Err(CodecError::MalformedExtent { extent });
        }
        Ok(Self {
            damage: Damage::from_bits(word(0..4)),
            src: Src::from_raw(word(4..8), word(8..12)),
            contains: TypeId::from_raw(word(12..16)),
            extent,
        })
    }
}

/// Read-only descriptor of one node inside a byte arena.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    arena: &'a [u8],
    offset: usize,
    header: NodeHeader,
}

impl<'a> NodeView<'a> {
    /// Decodes the node at `offset` and checks that its full extent lies
    /// inside the arena.
    pub fn read(arena: &'a [u8], offset: usize) -> Result<Self, CodecError> {
        let header = NodeHeader::decode(&arena[offset.min(arena.len())..])?;
        let end = offset + header.extent as usize;
        if end > arena.len() {
            return Err(CodecError::Truncated {
                needed: end,
                available: arena.len(),
            });
        }
        Ok(Self {
            arena,
            offset,
            header,
        })
    }

    pub fn header(&self) -> &NodeHeader {
        &self.header
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn extent(&self) -> u32 {
        self.header.extent
    }

    /// Offset of the following sibling: `offset + extent`.
    pub fn next_offset(&self) -> usize {
        self.offset + self.header.extent as usize
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.arena[self.offset + HEADER_SIZE..self.next_offset()]
    }

    pub fn payload_size(&self) -> usize {
        self.header.payload_size()
    }

    /// Full byte range of this node, header included.
    pub fn bytes(&self) -> &'a [u8] {
        &self.arena[self.offset..self.next_offset()]
    }

    /// Iterates the nested nodes inside this node's payload.
    pub fn children(&self) -> Children<'a> {
        Children {
            arena: self.arena,
            cursor: self.offset + HEADER_SIZE,
            end: self.next_offset(),
        }
    }
}

/// Sibling-walk iterator over a node's direct children.
pub struct Children<'a> {
    arena: &'a [u8],
    cursor: usize,
    end: usize,
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<NodeView<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        match NodeView::read(self.arena, self.cursor) {
            Ok(node) => {
                self.cursor = node.next_offset();
                Some(Ok(node))
            }
            Err(e) => {
                self.cursor = self.end; // stop the walk on a bad node
                Some(Err(e))
            }
        }
    }
}

/// Appending writer for one container tree inside a byte arena.
///
/// The writer has no knowledge of any capacity beyond the arena it was
/// given; an `alloc` that would run past the arena end fails with
/// [`CodecError::SlotOverflow`] before any byte is written.
pub struct ContainerWriter<'a> {
    arena: &'a mut [u8],
    open: Vec<usize>,
    cursor: usize,
}

impl<'a> ContainerWriter<'a> {
    pub fn new(arena: &'a mut [u8]) -> Self {
        Self::with_base(arena, 0)
    }

    /// Starts writing at `base`, leaving the bytes before it untouched.
    pub fn with_base(arena: &'a mut [u8], base: usize) -> Self {
        Self {
            arena,
            open: Vec::new(),
            cursor: base,
        }
    }

    /// Writes the root node header and opens the root.
    pub fn begin_root(&mut self, contains: TypeId, src: Src) -> Result<usize, CodecError> {
        if !self.open.is_empty() {
            return Err(CodecError::RootAlreadyOpen);
        }
        let offset = self.cursor;
        self.check_capacity(HEADER_SIZE)?;
        NodeHeader::new(contains, src).encode(&mut self.arena[offset..])?;
        self.open.push(offset);
        self.cursor = offset + HEADER_SIZE;
        Ok(offset)
    }

    /// Opens the root from an existing header, resetting its extent
    /// ("clone identity, discard children").
    pub fn begin_root_from(&mut self, header: &NodeHeader) -> Result<usize, CodecError> {
        if !self.open.is_empty() {
            return Err(CodecError::RootAlreadyOpen);
        }
        let offset = self.cursor;
        self.check_capacity(HEADER_SIZE)?;
        header.clone_identity().encode(&mut self.arena[offset..])?;
        self.open.push(offset);
        self.cursor = offset + HEADER_SIZE;
        Ok(offset)
    }

    /// Reserves `len` bytes after the current extent and grows every open
    /// node's extent by exactly `len`. Returns the arena offset of the
    /// reserved region.
    pub fn alloc(&mut self, len: usize) -> Result<usize, CodecError> {
        if self.open.is_empty() {
            return Err(CodecError::NoOpenNode);
        }
        self.check_capacity(len)?;
        for idx in 0..self.open.len() {
            self.grow_extent(self.open[idx], len as u32);
        }
        let offset = self.cursor;
        self.cursor += len;
        Ok(offset)
    }

    /// `alloc` plus copy of `bytes` into the reserved region.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize, CodecError> {
        let offset = self.alloc(bytes.len())?;
        self.arena[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(offset)
    }

    /// Opens a nested child node under the innermost open node.
    pub fn begin_child(&mut self, contains: TypeId, src: Src) -> Result<usize, CodecError> {
        let offset = self.alloc(HEADER_SIZE)?;
        NodeHeader::new(contains, src).encode(&mut self.arena[offset..])?;
        self.open.push(offset);
        Ok(offset)
    }

    /// Closes the innermost open child and returns its offset.
    pub fn end_child(&mut self) -> Result<usize, CodecError> {
        if self.open.len() < 2 {
            return Err(CodecError::NoOpenNode);
        }
        Ok(self.open.pop().expect("checked above"))
    }

    /// Raises a damage flag on the innermost open node.
    pub fn damage(&mut self, damage: Damage) -> Result<(), CodecError> {
        let offset = *self.open.last().ok_or(CodecError::NoOpenNode)?;
        let mut header = NodeHeader::decode(&self.arena[offset..])?;
        header.damage.merge(damage);
        header.encode(&mut self.arena[offset..])
    }

    /// Finishes the tree and returns the root header. All children must
    /// have been closed.
    pub fn finish(mut self) -> Result<NodeHeader, CodecError> {
        if self.open.len() != 1 {
            return Err(if self.open.is_empty() {
                CodecError::NoOpenNode
            } else {
                CodecError::UnclosedChild
            });
        }
        let root = self.open.pop().expect("checked above");
        NodeHeader::decode(&self.arena[root..])
    }

    /// Bytes written so far, from the start of the arena.
    pub fn written(&self) -> usize {
        self.cursor
    }

    fn check_capacity(&self, len: usize) -> Result<(), CodecError> {
        if self.cursor + len > self.arena.len() {
            return Err(CodecError::SlotOverflow {
                needed: self.cursor + len,
                capacity: self.arena.len(),
            });
        }
        Ok(())
    }

    fn grow_extent(&mut self, node_offset: usize, len: u32) {
        let field = &mut self.arena[node_offset + 16..node_offset + 20];
        let extent = u32::from_le_bytes(field.try_into().expect("4-byte field")) + len;
        field.copy_from_slice(&extent.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Level;
    use proptest::prelude::*;

    fn raw_tag() -> TypeId {
        TypeId::new(Kind::Raw, 1)
    }

    #[test]
    fn header_layout_is_bit_exact() {
        let mut header = NodeHeader::new(raw_tag(), Src::new(Level::Source, 0x2a));
        header.damage.increase(crate::DamageFlag::UserDefined);
        header.extent = 0x24;
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf).unwrap();
        // damage | src.log | src.value | contains | extent, little-endian
        assert_eq!(
            hex::encode(buf),
            "00400000000000012a0000000100010024000000"
        );
        assert_eq!(NodeHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn alloc_grows_extent_by_exactly_size() {
        let mut arena = vec![0u8; 256];
        let mut writer = ContainerWriter::new(&mut arena);
        writer.begin_root(raw_tag(), Src::new(Level::Source, 1)).unwrap();
        let first = writer.alloc(16).unwrap();
        assert_eq!(first, HEADER_SIZE); // region starts at the extent boundary
        let second = writer.alloc(8).unwrap();
        assert_eq!(second, HEADER_SIZE + 16);
        let root = writer.finish().unwrap();
        assert_eq!(root.extent as usize, HEADER_SIZE + 24);
    }

    #[test]
    fn clone_identity_discards_children() {
        let mut header = NodeHeader::new(raw_tag(), Src::new(Level::Source, 3));
        header.extent = 512;
        let copy = header.clone_identity();
        assert_eq!(copy.src, header.src);
        assert_eq!(copy.contains, header.contains);
        assert_eq!(copy.extent as usize, HEADER_SIZE);
    }

    #[test]
    fn walk_reproduces_insertion_order() {
        let mut arena = vec![0u8; 512];
        let inserted: Vec<(u32, Vec<u8>)> = vec![
            (5, b"alpha".to_vec()),
            (2, b"beta-longer".to_vec()),
            (9, vec![]),
        ];
        let mut writer = ContainerWriter::new(&mut arena);
        writer
            .begin_root(TypeId::new(Kind::Parent, 1), Src::new(Level::Event, 0))
            .unwrap();
        for (id, payload) in &inserted {
            writer.begin_child(raw_tag(), Src::new(Level::Source, *id)).unwrap();
            writer.append(payload).unwrap();
            writer.end_child().unwrap();
        }
        let root_extent = writer.finish().unwrap().extent as usize;

        let root = NodeView::read(&arena, 0).unwrap();
        assert_eq!(root.extent() as usize, root_extent);
        let walked: Vec<(u32, Vec<u8>)> = root
            .children()
            .map(|child| {
                let child = child.unwrap();
                assert_eq!(child.header().contains, raw_tag());
                (child.header().src.value(), child.payload().to_vec())
            })
            .collect();
        assert_eq!(walked, inserted);
    }

    #[test]
    fn sibling_address_is_offset_plus_extent() {
        let mut arena = vec![0u8; 256];
        let mut writer = ContainerWriter::new(&mut arena);
        writer
            .begin_root(TypeId::new(Kind::Parent, 1), Src::new(Level::Event, 0))
            .unwrap();
        writer.begin_child(raw_tag(), Src::new(Level::Source, 1)).unwrap();
        writer.append(b"0123456789").unwrap();
        writer.end_child().unwrap();
        writer.begin_child(raw_tag(), Src::new(Level::Source, 2)).unwrap();
        writer.end_child().unwrap();
        writer.finish().unwrap();

        let root = NodeView::read(&arena, 0).unwrap();
        let mut children = root.children();
        let first = children.next().unwrap().unwrap();
        let second = children.next().unwrap().unwrap();
        assert_eq!(second.offset(), first.next_offset());
        assert_eq!(first.next_offset(), first.offset() + first.extent() as usize);
    }

    #[test]
    fn overflowing_alloc_is_rejected_before_writing() {
        let mut arena = vec![0u8; HEADER_SIZE + 8];
        let mut writer = ContainerWriter::new(&mut arena);
        writer.begin_root(raw_tag(), Src::new(Level::Source, 1)).unwrap();
        assert!(matches!(
            writer.alloc(9),
            Err(CodecError::SlotOverflow { needed: 29, capacity: 28 })
        ));
        // A fitting alloc still works afterwards.
        writer.alloc(8).unwrap();
        assert_eq!(writer.finish().unwrap().extent as usize, HEADER_SIZE + 8);
    }

    #[test]
    fn truncated_arena_is_detected() {
        let arena = [0u8; 4];
        assert!(matches!(
            NodeHeader::decode(&arena),
            Err(CodecError::Truncated { .. })
        ));
    }

    proptest! {
        #[test]
        fn alloc_returns_previous_extent_boundary(sizes in proptest::collection::vec(0usize..64, 1..16)) {
            let total: usize = sizes.iter().sum();
            let mut arena = vec![0u8; HEADER_SIZE + total];
            let mut writer = ContainerWriter::new(&mut arena);
            writer.begin_root(raw_tag(), Src::new(Level::Source, 1)).unwrap();
            let mut expected = HEADER_SIZE;
            for size in &sizes {
                let offset = writer.alloc(*size).unwrap();
                prop_assert_eq!(offset, expected);
                expected += size;
            }
            let root = writer.finish().unwrap();
            prop_assert_eq!(root.extent as usize, HEADER_SIZE + total);
        }
    }
}
