//! ## skarv-engine::groups
//! **Consumer groups and delivery semantics**
//!
//! Clients attach under a queue index. Members sharing one index form a
//! competing group: each event goes to exactly one of them, round-robin.
//! Distinct indices each independently receive every event. Consumption
//! is synchronous: `consume` returning means the member is done with the
//! borrowed view.

use skarv_codec::DatagramView;

use crate::error::EngineError;

/// A downstream client. The view borrows the buffer slot, so a consumer
/// must not hold onto it past the call.
pub trait EventConsumer: Send {
    fn consume(&mut self, event: &DatagramView<'_>);
}

struct Group {
    members: Vec<Box<dyn EventConsumer>>,
    next: usize,
}

/// The attached consumer groups, indexed by queue.
pub struct ConsumerGroups {
    groups: Vec<Group>,
}

impl ConsumerGroups {
    pub fn new(num_groups: usize) -> Self {
        let groups = (0..num_groups)
            .map(|_| Group {
                members: Vec::new(),
                next: 0,
            })
            .collect();
        Self { groups }
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Attaches a client to the competing group at `queue`.
    pub fn attach(
        &mut self,
        queue: usize,
        consumer: Box<dyn EventConsumer>,
    ) -> Result<(), EngineError> {
        let group = self
            .groups
            .get_mut(queue)
            .ok_or(EngineError::QueueOutOfRange(queue))?;
        group.members.push(consumer);
        Ok(())
    }

    /// Delivers one event: exactly one member per non-empty group.
    /// Returns the number of deliveries made.
    pub fn deliver(&mut self, event: &DatagramView<'_>) -> usize {
        let mut delivered = 0;
        for group in &mut self.groups {
            if group.members.is_empty() {
                continue;
            }
            let pick = group.next % group.members.len();
            group.next = (pick + 1) % group.members.len();
            group.members[pick].consume(event);
            delivered += 1;
        }
        delivered
    }
}
