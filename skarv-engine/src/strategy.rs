//! ## skarv-engine::strategy
//! **Delivery strategy seam**
//!
//! The generic distribution engine drives three operations whose
//! implementation varies by deployment: materializing a built event into
//! a slot, accounting for a reclaimed slot, and posting an upstream
//! buffer request. A strategy is injected at construction, never
//! subclassed.

use std::sync::Arc;

use tracing::{debug, warn};

use skarv_codec::{
    begin_datagram, DatagramHeader, Kind, Level, NodeView, Src, Transition, TypeId,
    DGRAM_HEADER_SIZE,
};
use skarv_core::assembly::CompletedEvent;
use skarv_core::pool::SlotIndex;
use skarv_core::registry::FragmentRegistry;
use skarv_transport::{ImmKind, ImmValue, Link, PostOutcome};

use crate::error::EngineError;

/// Result of one replenishment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request was accepted by the named peer.
    Posted { peer: u32 },
    /// Every configured peer refused the post; the request is dropped
    /// and retried on a later cycle.
    Dropped,
}

/// The three operations the distribution engine delegates.
pub trait DeliveryStrategy: Send {
    /// Materializes `event` into `slot`, returning the bytes written.
    fn on_build_event(
        &mut self,
        event: &CompletedEvent,
        slot: &mut [u8],
    ) -> Result<usize, EngineError>;

    /// Called once the slot index has been returned to the free list.
    fn on_release_buffer(&mut self, index: SlotIndex);

    /// Posts an upstream buffer request carrying `index`.
    fn on_request_buffer(&mut self, index: SlotIndex) -> RequestOutcome;
}

/// Production strategy: flat materialization from the fragment registry
/// and round-robin replenishment across upstream peer links.
pub struct BuilderStrategy {
    registry: Arc<FragmentRegistry>,
    links: Vec<Box<dyn Link>>,
    own_id: u32,
    own_src: Src,
    next_peer: usize,
}

impl BuilderStrategy {
    pub fn new(registry: Arc<FragmentRegistry>, links: Vec<Box<dyn Link>>, own_id: u32) -> Self {
        Self {
            registry,
            links,
            own_id,
            own_src: Src::new(Level::Event, own_id),
            next_peer: 0,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.links.len()
    }
}

impl DeliveryStrategy for BuilderStrategy {
    /// Copies the root header, then appends each fragment's full byte
    /// range (header, payload, nested children) in arrival order under
    /// the new root: one flat container tree for the complete event.
    fn on_build_event(
        &mut self,
        event: &CompletedEvent,
        slot: &mut [u8],
    ) -> Result<usize, EngineError> {
        let header = DatagramHeader {
            event_id: event.event_id,
            timestamp: event.timestamp,
            transition: Transition::Event,
        };
        let mut writer = begin_datagram(slot, &header)?;
        writer.begin_root(TypeId::new(Kind::Parent, 1), self.own_src)?;
        writer.damage(event.damage)?;
        for fragment in &event.directory {
            let bytes = self
                .registry
                .resolve(&fragment.location)
                .ok_or(EngineError::MissingFragment(fragment.location.arena.0))?;
            let node = NodeView::read(&bytes, fragment.location.offset as usize)?;
            writer.append(node.bytes())?;
        }
        let root = writer.finish()?;
        Ok(DGRAM_HEADER_SIZE + root.extent as usize)
    }

    fn on_release_buffer(&mut self, index: SlotIndex) {
        debug!(index = index.0, "buffer slot reclaimed");
    }

    fn on_request_buffer(&mut self, index: SlotIndex) -> RequestOutcome {
        let imm = ImmValue::pack(ImmKind::Buffer, self.own_id, index.0);
        for _ in 0..self.links.len() {
            let link = &self.links[self.next_peer];
            self.next_peer = (self.next_peer + 1) % self.links.len();
            match link.post(&[], imm.raw()) {
                Ok(PostOutcome::Delivered) => {
                    return RequestOutcome::Posted { peer: link.id() };
                }
                Ok(PostOutcome::NotDelivered) => continue,
                Err(error) => {
                    warn!(peer = link.id(), %error, "buffer request post failed");
                    continue;
                }
            }
        }
        RequestOutcome::Dropped
    }
}
