//! ## skarv-core::assembly
//! **Per-event-id fragment correlation**
//!
//! The assembler is configured with the set of contributor ids expected to
//! participate. Each event id moves `Waiting -> Complete` exactly when a
//! fragment from every expected contributor has arrived, and is retired
//! when the distribution path consumes it. The contribution directory is
//! ordered by arrival, not by contributor id, and that order is preserved
//! into the built event's sub-node order.
//!
//! Completed events are drained in non-decreasing event-id order: a
//! completed event behind a still-waiting earlier id is held back until
//! the earlier event completes.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use skarv_codec::{Damage, DamageFlag, DGRAM_HEADER_SIZE, HEADER_SIZE};

use crate::registry::FragmentRef;

/// Highest contributor id representable in the 64-bit participation mask.
pub const MAX_CONTRIBUTOR_ID: u32 = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("contributor set is empty")]
    EmptyContributorSet,
    #[error("contributor id {0} exceeds {MAX_CONTRIBUTOR_ID}")]
    ContributorOutOfRange(u32),
    #[error("fragment from contributor {0} which is not in the expected set")]
    UnexpectedContributor(u32),
}

/// Bitmask of contributor ids participating in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContributorSet(u64);

impl ContributorSet {
    pub fn from_ids<I: IntoIterator<Item = u32>>(ids: I) -> Result<Self, AssemblyError> {
        let mut mask = 0u64;
        for id in ids {
            if id > MAX_CONTRIBUTOR_ID {
                return Err(AssemblyError::ContributorOutOfRange(id));
            }
            mask |= 1 << id;
        }
        if mask == 0 {
            return Err(AssemblyError::EmptyContributorSet);
        }
        Ok(Self(mask))
    }

    pub fn from_mask(mask: u64) -> Result<Self, AssemblyError> {
        if mask == 0 {
            return Err(AssemblyError::EmptyContributorSet);
        }
        Ok(Self(mask))
    }

    pub fn mask(&self) -> u64 {
        self.0
    }

    pub fn contains(&self, id: u32) -> bool {
        id <= MAX_CONTRIBUTOR_ID && self.0 & (1 << id) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One contributor's arrived fragment, as a location, never an owner.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub event_id: u64,
    pub timestamp: u64,
    pub contributor: u32,
    pub damage: Damage,
    /// Extent of the fragment's container root: the byte count appended
    /// under the built event's root at materialization.
    pub extent: u32,
    pub location: FragmentRef,
}

/// A fully correlated event, ready for materialization and delivery.
#[derive(Debug, Clone)]
pub struct CompletedEvent {
    pub event_id: u64,
    pub timestamp: u64,
    pub damage: Damage,
    /// Fragment locations in arrival order.
    pub directory: Vec<Fragment>,
}

impl CompletedEvent {
    /// Extent of the built event's root node: its own header plus every
    /// fragment's full byte range.
    pub fn built_extent(&self) -> usize {
        HEADER_SIZE
            + self
                .directory
                .iter()
                .map(|fragment| fragment.extent as usize)
                .sum::<usize>()
    }

    /// Total built datagram size. Must be pre-validated against the slot
    /// size before any copy is attempted.
    pub fn built_size(&self) -> usize {
        DGRAM_HEADER_SIZE + self.built_extent()
    }
}

struct PendingEvent {
    arrived: u64,
    timestamp: u64,
    damage: Damage,
    directory: Vec<Fragment>,
}

/// Correlates per-contributor fragments into complete events.
pub struct EventAssembler {
    expected: ContributorSet,
    pending: BTreeMap<u64, PendingEvent>,
    duplicates: u64,
}

impl EventAssembler {
    pub fn new(expected: ContributorSet) -> Self {
        Self {
            expected,
            pending: BTreeMap::new(),
            duplicates: 0,
        }
    }

    pub fn expected(&self) -> ContributorSet {
        self.expected
    }

    /// Records one arrived fragment. A duplicate arrival from a
    /// contributor that already reported is dropped (first arrival wins)
    /// and marks the pending event as damaged.
    pub fn insert(&mut self, fragment: Fragment) -> Result<(), AssemblyError> {
        if !self.expected.contains(fragment.contributor) {
            return Err(AssemblyError::UnexpectedContributor(fragment.contributor));
        }
        let expected_len = self.expected.len();
        let entry = self
            .pending
            .entry(fragment.event_id)
            .or_insert_with(|| PendingEvent {
                arrived: 0,
                timestamp: fragment.timestamp,
                damage: Damage::none(),
                directory: Vec::with_capacity(expected_len),
            });
        let bit = 1u64 << fragment.contributor;
        if entry.arrived & bit != 0 {
            self.duplicates += 1;
            entry.damage.increase(DamageFlag::DroppedContribution);
            warn!(
                event_id = fragment.event_id,
                contributor = fragment.contributor,
                "duplicate contribution dropped"
            );
            return Ok(());
        }
        entry.arrived |= bit;
        entry.damage.merge(fragment.damage);
        entry.directory.push(fragment);
        Ok(())
    }

    /// Drains events that are complete and not behind any earlier pending
    /// id, in non-decreasing event-id order.
    pub fn drain_complete(&mut self) -> Vec<CompletedEvent> {
        let mut complete = Vec::new();
        while let Some((&event_id, entry)) = self.pending.iter().next() {
            if entry.arrived != self.expected.mask() {
                break;
            }
            let entry = self.pending.remove(&event_id).expect("front entry exists");
            complete.push(CompletedEvent {
                event_id,
                timestamp: entry.timestamp,
                damage: entry.damage,
                directory: entry.directory,
            });
        }
        complete
    }

    /// Whether the given event id is still waiting on contributions.
    pub fn is_waiting(&self, event_id: u64) -> bool {
        self.pending.contains_key(&event_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ArenaId;

    fn fragment(event_id: u64, contributor: u32) -> Fragment {
        Fragment {
            event_id,
            timestamp: event_id * 10,
            contributor,
            damage: Damage::none(),
            extent: 32,
            location: FragmentRef {
                arena: ArenaId(contributor),
                offset: 20,
            },
        }
    }

    fn assembler_for(ids: &[u32]) -> EventAssembler {
        EventAssembler::new(ContributorSet::from_ids(ids.iter().copied()).unwrap())
    }

    #[test]
    fn completes_exactly_when_all_contributors_arrived() {
        // Contributor set {A=1, B=2, C=3}, arrivals B, A, C for event 42.
        let mut assembler = assembler_for(&[1, 2, 3]);
        assembler.insert(fragment(42, 2)).unwrap();
        assert!(assembler.drain_complete().is_empty());
        assembler.insert(fragment(42, 1)).unwrap();
        assert!(assembler.drain_complete().is_empty());
        assembler.insert(fragment(42, 3)).unwrap();

        let complete = assembler.drain_complete();
        assert_eq!(complete.len(), 1);
        let event = &complete[0];
        assert_eq!(event.event_id, 42);
        // Sub-node order is arrival order: B, A, C.
        let order: Vec<u32> = event.directory.iter().map(|f| f.contributor).collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert!(!assembler.is_waiting(42));
    }

    #[test]
    fn unexpected_contributor_is_rejected() {
        let mut assembler = assembler_for(&[1, 2]);
        assert_eq!(
            assembler.insert(fragment(1, 5)),
            Err(AssemblyError::UnexpectedContributor(5))
        );
    }

    #[test]
    fn duplicate_contribution_marks_damage_and_keeps_first() {
        let mut assembler = assembler_for(&[1, 2]);
        assembler.insert(fragment(7, 1)).unwrap();
        assembler.insert(fragment(7, 1)).unwrap(); // duplicate
        assert!(assembler.drain_complete().is_empty()); // still waiting on 2
        assembler.insert(fragment(7, 2)).unwrap();

        let complete = assembler.drain_complete();
        assert_eq!(complete.len(), 1);
        assert!(complete[0].damage.has(DamageFlag::DroppedContribution));
        assert_eq!(complete[0].directory.len(), 2);
        assert_eq!(assembler.duplicates(), 1);
    }

    #[test]
    fn fragment_damage_propagates_to_built_event() {
        let mut assembler = assembler_for(&[1]);
        let mut damaged = fragment(3, 1);
        damaged.damage.increase(DamageFlag::UserDefined);
        assembler.insert(damaged).unwrap();
        let complete = assembler.drain_complete();
        assert!(complete[0].damage.has(DamageFlag::UserDefined));
    }

    #[test]
    fn later_completion_is_held_behind_earlier_pending_event() {
        let mut assembler = assembler_for(&[1, 2]);
        assembler.insert(fragment(4, 1)).unwrap();
        // Event 5 completes first.
        assembler.insert(fragment(5, 1)).unwrap();
        assembler.insert(fragment(5, 2)).unwrap();
        assert!(assembler.drain_complete().is_empty());
        // Once 4 completes, both drain in id order.
        assembler.insert(fragment(4, 2)).unwrap();
        let ids: Vec<u64> = assembler
            .drain_complete()
            .iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn built_size_sums_directory_extents() {
        let mut assembler = assembler_for(&[1, 2]);
        assembler.insert(fragment(9, 1)).unwrap();
        assembler.insert(fragment(9, 2)).unwrap();
        let event = assembler.drain_complete().remove(0);
        assert_eq!(event.built_extent(), HEADER_SIZE + 64);
        assert_eq!(event.built_size(), DGRAM_HEADER_SIZE + HEADER_SIZE + 64);
    }

    #[test]
    fn contributor_set_validation() {
        assert_eq!(
            ContributorSet::from_ids([]),
            Err(AssemblyError::EmptyContributorSet)
        );
        assert_eq!(
            ContributorSet::from_ids([64]),
            Err(AssemblyError::ContributorOutOfRange(64))
        );
        let set = ContributorSet::from_ids([0, 63]).unwrap();
        assert!(set.contains(0));
        assert!(set.contains(63));
        assert!(!set.contains(1));
        assert_eq!(set.len(), 2);
    }
}
