//! ## skarv-codec::datagram
//! **Container root plus event identity**
//!
//! A datagram is what actually moves: a 20-byte header carrying the event
//! id, a timestamp and a transition tag, followed by one container root.
//! The same shape is used for a single contributor's fragment and for a
//! fully built event.

use bytes::Bytes;

use crate::node::{CodecError, ContainerWriter, Kind, NodeView, TypeId, HEADER_SIZE};
use crate::source::Src;

/// Byte size of the datagram header preceding the container root.
pub const DGRAM_HEADER_SIZE: usize = 20;

/// What this datagram marks in the run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Transition {
    Configure = 0,
    BeginRun = 1,
    Enable = 2,
    Disable = 3,
    EndRun = 4,
    /// Ordinary event data. The overwhelmingly common case.
    Event = 5,
}

impl Transition {
    pub fn from_u32(value: u32) -> Result<Transition, CodecError> {
        match value {
            0 => Ok(Transition::Configure),
            1 => Ok(Transition::BeginRun),
            2 => Ok(Transition::Enable),
            3 => Ok(Transition::Disable),
            4 => Ok(Transition::EndRun),
            5 => Ok(Transition::Event),
            other => Err(CodecError::UnknownTransition(other)),
        }
    }
}

/// Fixed header preceding the container root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub event_id: u64,
    pub timestamp: u64,
    pub transition: Transition,
}

impl DatagramHeader {
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        if buf.len() < DGRAM_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: DGRAM_HEADER_SIZE,
                available: buf.len(),
            });
        }
        buf[0..8].copy_from_slice(&self.event_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[16..20].copy_from_slice(&(self.transition as u32).to_le_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < DGRAM_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: DGRAM_HEADER_SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            event_id: u64::from_le_bytes(buf[0..8].try_into().expect("8-byte range")),
            timestamp: u64::from_le_bytes(buf[8..16].try_into().expect("8-byte range")),
            transition: Transition::from_u32(u32::from_le_bytes(
                buf[16..20].try_into().expect("4-byte range"),
            ))?,
        })
    }
}

/// Read-only view of a datagram inside a byte arena.
#[derive(Debug, Clone, Copy)]
pub struct DatagramView<'a> {
    header: DatagramHeader,
    root: NodeView<'a>,
}

impl<'a> DatagramView<'a> {
    /// Parses the datagram starting at `offset` within `arena`.
    pub fn read(arena: &'a [u8], offset: usize) -> Result<Self, CodecError> {
        let header = DatagramHeader::decode(&arena[offset.min(arena.len())..])?;
        let root = NodeView::read(arena, offset + DGRAM_HEADER_SIZE)?;
        Ok(Self { header, root })
    }

    pub fn parse(arena: &'a [u8]) -> Result<Self, CodecError> {
        Self::read(arena, 0)
    }

    pub fn header(&self) -> &DatagramHeader {
        &self.header
    }

    pub fn root(&self) -> &NodeView<'a> {
        &self.root
    }

    /// Total wire size: datagram header plus the root's extent.
    pub fn size(&self) -> usize {
        DGRAM_HEADER_SIZE + self.root.extent() as usize
    }
}

/// Writes the datagram header into `arena` and hands back a container
/// writer positioned just after it.
pub fn begin_datagram<'a>(
    arena: &'a mut [u8],
    header: &DatagramHeader,
) -> Result<ContainerWriter<'a>, CodecError> {
    header.encode(arena)?;
    Ok(ContainerWriter::with_base(arena, DGRAM_HEADER_SIZE))
}

/// Builds one contributor fragment: a datagram whose root is a raw node
/// from `src` holding `payload`.
pub fn build_fragment(
    event_id: u64,
    timestamp: u64,
    src: Src,
    payload: &[u8],
) -> Result<Bytes, CodecError> {
    let mut buf = vec![0u8; DGRAM_HEADER_SIZE + HEADER_SIZE + payload.len()];
    let header = DatagramHeader {
        event_id,
        timestamp,
        transition: Transition::Event,
    };
    let mut writer = begin_datagram(&mut buf, &header)?;
    writer.begin_root(TypeId::new(Kind::Raw, 1), src)?;
    writer.append(payload)?;
    writer.finish()?;
    Ok(Bytes::from(buf))
}
