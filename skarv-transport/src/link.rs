//! ## skarv-transport::link
//! **Reliable-datagram link traits**

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no endpoint listening at {addr}:{port}")]
    ConnectFailed { addr: String, port: u16 },
    #[error("connect to {addr}:{port} timed out after {timeout_ms} ms")]
    ConnectTimeout {
        addr: String,
        port: u16,
        timeout_ms: u64,
    },
    #[error("link to peer {0} is down")]
    LinkDown(u32),
}

/// Result of a single bounded, non-blocking post attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Delivered,
    NotDelivered,
}

/// One established link to a remote peer.
pub trait Link: Send + Sync {
    /// Posts a datagram with an immediate value. Bounded attempt: returns
    /// immediately with the delivery outcome, never awaited indefinitely.
    fn post(&self, buf: &[u8], imm: u32) -> Result<PostOutcome, TransportError>;

    /// Identity of the remote peer.
    fn id(&self) -> u32;
}

/// Connector producing links to remote peers.
pub trait Transport {
    type Link: Link;

    fn connect(&self, addr: &str, port: u16, timeout_ms: u64)
        -> Result<Self::Link, TransportError>;
}
