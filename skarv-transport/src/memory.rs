//! ## skarv-transport::memory
//! **In-process reliable-datagram fabric**
//!
//! Endpoints bind under `(addr, port)` keys; a connect returns a link
//! whose `post` is a bounded try-send onto the endpoint's channel. A full
//! channel reports `NotDelivered`, modelling a peer that cannot accept
//! the datagram right now.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::link::{Link, PostOutcome, Transport, TransportError};

/// One delivered datagram: payload bytes plus the immediate value.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Bytes,
    pub imm: u32,
}

struct Endpoint {
    id: u32,
    tx: Sender<Message>,
}

/// In-process fabric of named endpoints.
#[derive(Clone, Default)]
pub struct MemoryFabric {
    endpoints: Arc<Mutex<HashMap<(String, u16), Endpoint>>>,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an endpoint with the given identity and queue depth,
    /// returning the receive side. Rebinding a key replaces the endpoint.
    pub fn bind(&self, addr: &str, port: u16, id: u32, capacity: usize) -> Receiver<Message> {
        let (tx, rx) = bounded(capacity);
        self.endpoints
            .lock()
            .insert((addr.to_string(), port), Endpoint { id, tx });
        rx
    }
}

impl Transport for MemoryFabric {
    type Link = MemoryLink;

    fn connect(
        &self,
        addr: &str,
        port: u16,
        _timeout_ms: u64,
    ) -> Result<Self::Link, TransportError> {
        let endpoints = self.endpoints.lock();
        let endpoint =
            endpoints
                .get(&(addr.to_string(), port))
                .ok_or_else(|| TransportError::ConnectFailed {
                    addr: addr.to_string(),
                    port,
                })?;
        Ok(MemoryLink {
            id: endpoint.id,
            tx: endpoint.tx.clone(),
        })
    }
}

/// Link to one bound endpoint.
pub struct MemoryLink {
    id: u32,
    tx: Sender<Message>,
}

impl Link for MemoryLink {
    fn post(&self, buf: &[u8], imm: u32) -> Result<PostOutcome, TransportError> {
        let message = Message {
            payload: Bytes::copy_from_slice(buf),
            imm,
        };
        match self.tx.try_send(message) {
            Ok(()) => Ok(PostOutcome::Delivered),
            Err(TrySendError::Full(_)) => Ok(PostOutcome::NotDelivered),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::LinkDown(self.id)),
        }
    }

    fn id(&self) -> u32 {
        self.id
    }
}
