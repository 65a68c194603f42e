//! # skarv-transport
//!
//! Opaque reliable-datagram collaborator surface. The core assumes only a
//! connect/post primitive: a `post` either reports delivered or not, with
//! no retry or ordering guarantee beyond the single call.
//!
//! The in-process memory fabric is the reference implementation, used by
//! tests and the loopback simulation mode.

pub mod imm;
pub mod link;
pub mod memory;

pub use imm::{ImmKind, ImmValue};
pub use link::{Link, PostOutcome, Transport, TransportError};
pub use memory::{MemoryFabric, MemoryLink, Message};
