//! ## skarv-codec::damage
//! **Fault annotations for degraded data**
//!
//! A damage mask travels with its node from the contributor all the way to
//! the consumer. Flags are only ever raised, never cleared: a damaged event
//! is still delivered and the consumer decides what to make of it.

/// Individual fault conditions, one bit each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DamageFlag {
    /// A contributor's fragment was dropped (e.g. a duplicate arrival).
    DroppedContribution = 1,
    /// Fragment arrived outside the expected event-id window.
    OutOfOrder = 12,
    /// Contributor and builder disagree on the event clock.
    OutOfSynch = 13,
    /// Meaning defined by the producing endpoint.
    UserDefined = 14,
    /// A fragment was shorter than its header claimed.
    IncompleteContribution = 15,
}

/// Bitmask of fault conditions attached to a container node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Damage(u32);

impl Damage {
    /// A clean mask with no faults raised.
    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Raises one fault condition. Existing flags are preserved.
    pub fn increase(&mut self, flag: DamageFlag) {
        self.0 |= 1 << (flag as u32);
    }

    /// Folds another mask into this one.
    pub fn merge(&mut self, other: Damage) {
        self.0 |= other.0;
    }

    pub fn has(&self, flag: DamageFlag) -> bool {
        self.0 & (1 << (flag as u32)) != 0
    }

    pub fn is_clean(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clean() {
        assert!(Damage::none().is_clean());
        assert_eq!(Damage::none().bits(), 0);
    }

    #[test]
    fn raises_and_keeps_flags() {
        let mut damage = Damage::none();
        damage.increase(DamageFlag::DroppedContribution);
        damage.increase(DamageFlag::UserDefined);
        assert!(damage.has(DamageFlag::DroppedContribution));
        assert!(damage.has(DamageFlag::UserDefined));
        assert!(!damage.has(DamageFlag::OutOfOrder));
    }

    #[test]
    fn merge_is_additive() {
        let mut a = Damage::none();
        a.increase(DamageFlag::OutOfOrder);
        let mut b = Damage::none();
        b.increase(DamageFlag::IncompleteContribution);
        a.merge(b);
        assert!(a.has(DamageFlag::OutOfOrder));
        assert!(a.has(DamageFlag::IncompleteContribution));
    }
}
