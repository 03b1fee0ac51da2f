//! Composition injector (C8): per-connection overlay layer store, injected
//! into the main application's `end-frame` layer array at the configured
//! z-placement. No direct corpus analogue beyond the general pending-set
//! pattern used for deferred swapchain/space teardown; the store and its
//! capacity/overflow behavior follow §4.8 directly.

use std::collections::HashSet;

use log::warn;
use thiserror::Error;

use crate::handle::LocalHandle;

#[derive(Error, Debug, Clone, Copy)]
pub enum CompositionError {
    #[error("submitted {submitted} layers, allowed {allowed}")]
    LayerLimitExceeded { submitted: usize, allowed: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct Layer {
    pub swapchain: LocalHandle,
    pub space: LocalHandle,
}

/// Per-connection composition store. `placement` sorts the overlay's layers
/// relative to the main's own layers in the injected array (negative =
/// below, positive = above, per §4.8).
pub struct CompositionStore {
    layers: Vec<Layer>,
    placement: i32,
    capacity: usize,
    pending_destroy: HashSet<LocalHandle>,
}

impl CompositionStore {
    pub fn new(capacity: usize) -> Self {
        CompositionStore {
            layers: Vec::new(),
            placement: 0,
            capacity,
            pending_destroy: HashSet::new(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn placement(&self) -> i32 {
        self.placement
    }

    /// Replaces the stored layer list with a deep copy of `submitted`
    /// (§4.8 "on overlay's end-frame, the main side replaces the stored
    /// overlay-layer list"). On overflow the store is cleared entirely so a
    /// stale oversized submission never partially composites.
    pub fn submit(&mut self, submitted: &[Layer], placement: i32) -> Result<(), CompositionError> {
        if submitted.len() > self.capacity {
            warn!(
                "end-frame submitted {} layers, allowed {}; clearing composition store",
                submitted.len(),
                self.capacity
            );
            self.layers.clear();
            return Err(CompositionError::LayerLimitExceeded {
                submitted: submitted.len(),
                allowed: self.capacity,
            });
        }
        self.layers = submitted.to_vec();
        self.placement = placement;
        Ok(())
    }

    /// Injects the stored layers into `main_layers` at the configured
    /// z-placement. Negative placement sorts below the main's own layers
    /// (prepended), non-negative sorts above (appended) — the signed
    /// magnitude beyond sign is not otherwise meaningful per §4.8.
    pub fn inject<T: Clone>(&self, main_layers: &[T], overlay_layers: &[T]) -> Vec<T> {
        let mut out = Vec::with_capacity(main_layers.len() + overlay_layers.len());
        if self.placement < 0 {
            out.extend_from_slice(overlay_layers);
            out.extend_from_slice(main_layers);
        } else {
            out.extend_from_slice(main_layers);
            out.extend_from_slice(overlay_layers);
        }
        out
    }

    /// Queues a destroy for an object that's still referenced by a stored
    /// layer. The main side issues the real destroy only once a subsequent
    /// `end-frame` observes the handle unreferenced (§4.8 deferred destroy).
    pub fn defer_destroy(&mut self, handle: LocalHandle) {
        self.pending_destroy.insert(handle);
    }

    pub fn is_referenced(&self, handle: LocalHandle) -> bool {
        self.layers
            .iter()
            .any(|layer| layer.swapchain == handle || layer.space == handle)
    }

    /// Drains and returns the handles whose deferred destroy can now be
    /// issued, i.e. no longer referenced by the current layer set. Called
    /// once per observed main `end-frame`.
    pub fn drain_ready_destroys(&mut self) -> Vec<LocalHandle> {
        let mut ready = Vec::new();
        let layers = &self.layers;
        self.pending_destroy.retain(|&handle| {
            if layers.iter().any(|layer| layer.swapchain == handle || layer.space == handle) {
                true
            } else {
                ready.push(handle);
                false
            }
        });
        ready
    }
}
