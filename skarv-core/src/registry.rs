//! ## skarv-core::registry
//! **Fragment arena registry**
//!
//! Fragments are referenced across the assembler/distribution boundary as
//! `(arena id, byte offset)` pairs, never as addresses. The registry owns
//! the fragment bytes from arrival until the built event that references
//! them has been fully materialized, at which point the arena is retired.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

/// Identifier of one registered fragment arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId(pub u32);

/// Location of a container node inside a registered arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRef {
    pub arena: ArenaId,
    pub offset: u32,
}

struct RegistryState {
    arenas: HashMap<u32, Bytes>,
    next: u32,
}

/// Owner of in-flight fragment memory.
pub struct FragmentRegistry {
    inner: Mutex<RegistryState>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryState {
                arenas: HashMap::new(),
                next: 0,
            }),
        }
    }

    /// Takes ownership of a fragment's bytes and returns its arena id.
    pub fn register(&self, bytes: Bytes) -> ArenaId {
        let mut state = self.inner.lock();
        let id = state.next;
        state.next = state.next.wrapping_add(1);
        state.arenas.insert(id, bytes);
        ArenaId(id)
    }

    /// Resolves a reference to the arena's bytes. `Bytes` is cheaply
    /// cloneable, so this hands out a view without copying the payload.
    pub fn resolve(&self, fref: &FragmentRef) -> Option<Bytes> {
        self.inner.lock().arenas.get(&fref.arena.0).cloned()
    }

    /// Drops a retired arena. Returns whether it was still registered.
    pub fn retire(&self, arena: ArenaId) -> bool {
        self.inner.lock().arenas.remove(&arena.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().arenas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FragmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_resolve_retire() {
        let registry = FragmentRegistry::new();
        let arena = registry.register(Bytes::from_static(b"fragment-bytes"));
        let fref = FragmentRef { arena, offset: 0 };
        assert_eq!(registry.resolve(&fref).unwrap(), &b"fragment-bytes"[..]);
        assert!(registry.retire(arena));
        assert!(registry.resolve(&fref).is_none());
        assert!(!registry.retire(arena));
    }

    #[test]
    fn ids_are_not_reused_within_a_run() {
        let registry = FragmentRegistry::new();
        let a = registry.register(Bytes::from_static(b"a"));
        registry.retire(a);
        let b = registry.register(Bytes::from_static(b"b"));
        assert_ne!(a, b);
    }
}
