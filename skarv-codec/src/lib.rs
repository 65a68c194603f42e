//! # skarv-codec
//!
//! Self-describing binary container format used for every fragment on the
//! wire and every built event in shared buffers.
//!
//! Each node is a fixed 20-byte header (`damage`, `src`, `contains`,
//! `extent`) followed by payload bytes, which may themselves hold nested
//! nodes of the same shape. Nodes are addressed as `(offset, extent)`
//! descriptors over a flat byte arena, never as language pointers, so the
//! same bytes can live in process memory, shared memory, or on the wire.
//!
//! ### Key Submodules:
//! - `damage`: fault bitmask carried on every node, propagated never cleared
//! - `source`: node origin identity with deterministic `(value, log)` ordering
//! - `node`: header codec plus arena views and writers
//! - `datagram`: container root with event id, timestamp and transition tag

pub mod damage;
pub mod datagram;
pub mod node;
pub mod source;

pub use damage::{Damage, DamageFlag};
pub use datagram::{
    begin_datagram, build_fragment, DatagramHeader, DatagramView, Transition, DGRAM_HEADER_SIZE,
};
pub use node::{CodecError, ContainerWriter, Kind, NodeHeader, NodeView, TypeId, HEADER_SIZE};
pub use source::{Level, Src};
