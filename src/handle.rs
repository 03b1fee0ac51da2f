//! Handle registry (C3): bidirectional local <-> actual identifier
//! translation, bijective per (connection, kind). Grounded on the
//! `Manager { next_id: AtomicU32, map: DashMap<u32, Overlay> }`
//! per-connection-registry shape used for overlay handle bookkeeping in the
//! reference DLL-injection overlay project, generalized from a single
//! handle kind to the closed set this engine needs.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandleKind {
    Instance,
    Session,
    Space,
    Swapchain,
    Action,
    ActionSet,
}

const KIND_SHIFT: u32 = 56;

/// An opaque local identifier handed to the overlay process. The top byte
/// carries the kind tag so a registry lookup can reject a handle used at
/// the wrong kind without a second table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalHandle(u64);

impl LocalHandle {
    pub fn kind(&self) -> HandleKind {
        match self.0 >> KIND_SHIFT {
            0 => HandleKind::Instance,
            1 => HandleKind::Session,
            2 => HandleKind::Space,
            3 => HandleKind::Swapchain,
            4 => HandleKind::Action,
            _ => HandleKind::ActionSet,
        }
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Reconstructs a handle from its raw wire representation, e.g. after
    /// round-tripping one through a hash set keyed on the raw id.
    pub fn from_raw(raw: u64) -> Self {
        LocalHandle(raw)
    }

    fn new(kind: HandleKind, counter: u64) -> Self {
        LocalHandle(((kind as u64) << KIND_SHIFT) | counter)
    }
}

#[derive(Error, Debug, Clone, Copy)]
pub enum RegistryError {
    #[error("local handle {0:?} not registered")]
    NotFound(LocalHandle),
    #[error("local handle {local:?} used as wrong kind (is {actual:?})")]
    KindMismatch { local: LocalHandle, actual: HandleKind },
    #[error("actual handle {0:#x} already bound to a different local handle")]
    AlreadyBound(u64),
}

/// Owned on the main side, one per connection. `next_id` is a single
/// process-wide monotonic counter shared across kinds (kind-tagged in the
/// top bits), so a local handle is never reused even across kinds, per
/// §4.3's "never reused within a connection" invariant.
pub struct HandleRegistry {
    next_id: AtomicU64,
    outbound: DashMap<LocalHandle, u64>,
    inbound: DashMap<u64, LocalHandle>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        HandleRegistry {
            next_id: AtomicU64::new(1),
            outbound: DashMap::new(),
            inbound: DashMap::new(),
        }
    }

    /// Wraps a freshly-returned actual identifier in a new local handle and
    /// inserts both directions of the mapping. Used on call return (main ->
    /// overlay direction).
    pub fn register(&self, kind: HandleKind, actual: u64) -> Result<LocalHandle, RegistryError> {
        if self.inbound.contains_key(&actual) {
            return Err(RegistryError::AlreadyBound(actual));
        }
        let counter = self.next_id.fetch_add(1, Ordering::Relaxed);
        let local = LocalHandle::new(kind, counter);
        self.outbound.insert(local, actual);
        self.inbound.insert(actual, local);
        Ok(local)
    }

    /// Translates a local identifier the overlay sent into the actual
    /// identifier the real runtime understands (overlay -> main direction).
    pub fn resolve(&self, local: LocalHandle, expected: HandleKind) -> Result<u64, RegistryError> {
        if local.kind() != expected {
            return Err(RegistryError::KindMismatch {
                local,
                actual: local.kind(),
            });
        }
        self.outbound
            .get(&local)
            .map(|entry| *entry.value())
            .ok_or(RegistryError::NotFound(local))
    }

    pub fn local_for(&self, actual: u64) -> Option<LocalHandle> {
        self.inbound.get(&actual).map(|entry| *entry.value())
    }

    /// Removes a handle from both directions. A destroyed local handle must
    /// never reappear in a later output (§8 invariant 3); callers achieve
    /// this by never recycling `next_id`, not by anything this method does.
    pub fn forget(&self, local: LocalHandle) {
        if let Some((_, actual)) = self.outbound.remove(&local) {
            self.inbound.remove(&actual);
        }
    }

    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_resolve_round_trips() {
        let registry = HandleRegistry::new();
        let local = registry.register(HandleKind::Session, 0xdead_beef).unwrap();
        assert_eq!(local.kind(), HandleKind::Session);
        assert_eq!(registry.resolve(local, HandleKind::Session).unwrap(), 0xdead_beef);
    }

    #[test]
    fn resolve_with_wrong_kind_fails() {
        let registry = HandleRegistry::new();
        let local = registry.register(HandleKind::Session, 1).unwrap();
        assert!(registry.resolve(local, HandleKind::Swapchain).is_err());
    }

    #[test]
    fn forgotten_handle_is_not_found_again() {
        let registry = HandleRegistry::new();
        let local = registry.register(HandleKind::Space, 7).unwrap();
        registry.forget(local);
        assert!(registry.resolve(local, HandleKind::Space).is_err());
        assert!(registry.local_for(7).is_none());
    }

    #[test]
    fn local_handles_are_never_reused() {
        let registry = HandleRegistry::new();
        let first = registry.register(HandleKind::Swapchain, 1).unwrap();
        registry.forget(first);
        let second = registry.register(HandleKind::Swapchain, 2).unwrap();
        assert_ne!(first.raw(), second.raw());
    }

    #[test]
    fn same_actual_handle_cannot_be_bound_twice() {
        let registry = HandleRegistry::new();
        registry.register(HandleKind::Instance, 42).unwrap();
        assert!(registry.register(HandleKind::Instance, 42).is_err());
    }
}
