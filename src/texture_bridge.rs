//! Texture bridge (C5): per-swapchain shared-handle textures and
//! keyed-mutex handoff between the overlay's GPU queue and the main's.
//! Grounded on the D3D11 device/texture creation shape in the reference
//! swapchain worker (`create_d3d_device`, shared-texture flags) and on the
//! `update_from_nt_shared(HANDLE)` shared-NT-handle update flow used by the
//! reference DLL-injection overlay project.

use std::collections::{HashMap, VecDeque};

use log::warn;
use thiserror::Error;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D, ID3D11DeviceContext};
use windows::Win32::Graphics::Dxgi::IDXGIKeyedMutex;

#[derive(Error, Debug, Clone, Copy)]
pub enum BridgeError {
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("wait/release issued without a matching acquire")]
    AcquireOrderViolation,
    #[error("keyed mutex acquire timed out")]
    KeyedMutexTimeout,
}

/// Keyed-mutex key convention (§4.5): the overlay GPU queue owns key 0, the
/// main's owns key 1. Named `Overlay`/`Main` here rather than the reference
/// implementation's `REMOTE`/`HOST` terminology, matching this engine's
/// overlay/main vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum KeyedMutexKey {
    Overlay = 0,
    Main = 1,
}

pub const MAX_MIP_LEVELS: u32 = 1;
pub const MAX_ARRAY_SIZE: u32 = 1;

fn validate_create_params(mip_levels: u32, array_size: u32) -> Result<(), BridgeError> {
    if mip_levels > MAX_MIP_LEVELS {
        warn!("rejecting swapchain create: mip_levels={mip_levels} exceeds 1");
        return Err(BridgeError::Unsupported("mip-mapped swapchains are not supported"));
    }
    if array_size > MAX_ARRAY_SIZE {
        warn!("rejecting swapchain create: array_size={array_size} exceeds 1");
        return Err(BridgeError::Unsupported("array swapchains are not supported"));
    }
    Ok(())
}

/// Main-side per-swapchain state (§3 "Swapchain bridge entry"). `held_by_overlay`
/// tracks which shared handles are currently out with the overlay so a
/// teardown can force-release them; `opened` caches one opened texture
/// alias per unique shared handle so repeated releases don't reopen the
/// resource every time.
pub struct SwapchainBridgeEntry {
    runtime_images: Vec<ID3D11Texture2D>,
    held_by_overlay: Vec<HANDLE>,
    opened: HashMap<isize, ID3D11Texture2D>,
    acquired: VecDeque<usize>,
}

impl SwapchainBridgeEntry {
    pub fn new(runtime_images: Vec<ID3D11Texture2D>) -> Self {
        SwapchainBridgeEntry {
            runtime_images,
            held_by_overlay: Vec::new(),
            opened: HashMap::new(),
            acquired: VecDeque::new(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.runtime_images.len()
    }

    pub fn mark_acquired(&mut self, index: usize) {
        self.acquired.push_back(index);
    }

    pub fn mark_held_by_overlay(&mut self, handle: HANDLE) {
        self.held_by_overlay.push(handle);
    }

    pub fn clear_held(&mut self, handle: HANDLE) {
        self.held_by_overlay.retain(|h| h.0 != handle.0);
    }

    /// FIFO invariant (§4.5): the front of the acquired queue is always the
    /// index being waited or released next.
    pub fn front_acquired(&self) -> Result<usize, BridgeError> {
        self.acquired.front().copied().ok_or(BridgeError::AcquireOrderViolation)
    }

    pub fn pop_released(&mut self) -> Result<usize, BridgeError> {
        self.acquired.pop_front().ok_or(BridgeError::AcquireOrderViolation)
    }

    /// Performs the main-side half of `release-swapchain-image`: acquire
    /// the keyed mutex with `Main`'s key (blocking until the overlay
    /// releases it), open the shared resource once per unique handle, copy
    /// into the runtime-owned image at `index`, release the keyed mutex.
    pub fn copy_released_image(
        &mut self,
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        handle: HANDLE,
        index: usize,
    ) -> Result<(), BridgeError> {
        let keyed_mutex = self.open_shared_texture(device, handle)?;
        acquire_keyed_mutex(&keyed_mutex, KeyedMutexKey::Main)?;

        let source = self.opened.get(&handle.0).expect("opened just above");
        unsafe {
            context.CopyResource(&self.runtime_images[index], source);
        }

        release_keyed_mutex(&keyed_mutex, KeyedMutexKey::Overlay)?;
        self.clear_held(handle);
        Ok(())
    }

    fn open_shared_texture(
        &mut self,
        device: &ID3D11Device,
        handle: HANDLE,
    ) -> Result<IDXGIKeyedMutex, BridgeError> {
        if let Some(texture) = self.opened.get(&handle.0) {
            return texture.cast().map_err(|_| BridgeError::Unsupported("keyed mutex interface missing"));
        }
        let texture: ID3D11Texture2D = unsafe { device.OpenSharedResource(handle) }
            .map_err(|_| BridgeError::Unsupported("failed to open shared texture"))?;
        let keyed_mutex: IDXGIKeyedMutex = texture
            .cast()
            .map_err(|_| BridgeError::Unsupported("keyed mutex interface missing"))?;
        self.opened.insert(handle.0, texture);
        Ok(keyed_mutex)
    }

    /// Forces every handle still marked held-by-overlay to release with the
    /// `Overlay` key, so subsequent destroys on connection teardown can
    /// acquire it (§4.5 teardown invariant).
    pub fn force_release_all(&mut self) {
        for handle in self.held_by_overlay.drain(..) {
            if let Some(texture) = self.opened.get(&handle.0) {
                if let Ok(keyed_mutex) = texture.cast::<IDXGIKeyedMutex>() {
                    let _ = release_keyed_mutex(&keyed_mutex, KeyedMutexKey::Overlay);
                }
            }
        }
    }
}

/// Overlay-side per-swapchain state (§3 "Overlay swapchain entry").
pub struct OverlaySwapchainEntry {
    local_textures: Vec<ID3D11Texture2D>,
    duplicated_handles: Vec<HANDLE>,
    acquired: VecDeque<usize>,
}

impl OverlaySwapchainEntry {
    pub fn new(local_textures: Vec<ID3D11Texture2D>, duplicated_handles: Vec<HANDLE>) -> Self {
        debug_assert_eq!(local_textures.len(), duplicated_handles.len());
        OverlaySwapchainEntry {
            local_textures,
            duplicated_handles,
            acquired: VecDeque::new(),
        }
    }

    pub fn duplicated_handle(&self, index: usize) -> HANDLE {
        self.duplicated_handles[index]
    }

    pub fn mark_acquired(&mut self, index: usize) {
        self.acquired.push_back(index);
    }

    pub fn pop_released(&mut self) -> Result<usize, BridgeError> {
        self.acquired.pop_front().ok_or(BridgeError::AcquireOrderViolation)
    }

    /// Overlay-side half of `wait-swapchain-image`: acquire the keyed mutex
    /// with the `Overlay` key after the main side's real wait has returned.
    pub fn acquire_for_rendering(&self, index: usize) -> Result<(), BridgeError> {
        let keyed_mutex: IDXGIKeyedMutex = self.local_textures[index]
            .cast()
            .map_err(|_| BridgeError::Unsupported("keyed mutex interface missing"))?;
        acquire_keyed_mutex(&keyed_mutex, KeyedMutexKey::Overlay)
    }

    /// Overlay-side half of `release-swapchain-image`: release the keyed
    /// mutex with the `Main` key so the main side can pick it up.
    pub fn release_for_main(&self, index: usize) -> Result<(), BridgeError> {
        let keyed_mutex: IDXGIKeyedMutex = self.local_textures[index]
            .cast()
            .map_err(|_| BridgeError::Unsupported("keyed mutex interface missing"))?;
        release_keyed_mutex(&keyed_mutex, KeyedMutexKey::Main)
    }
}

const KEYED_MUTEX_TIMEOUT_MS: u32 = 2000;

fn acquire_keyed_mutex(keyed_mutex: &IDXGIKeyedMutex, key: KeyedMutexKey) -> Result<(), BridgeError> {
    unsafe { keyed_mutex.AcquireSync(key as u64, KEYED_MUTEX_TIMEOUT_MS) }
        .map_err(|_| BridgeError::KeyedMutexTimeout)
}

fn release_keyed_mutex(keyed_mutex: &IDXGIKeyedMutex, key: KeyedMutexKey) -> Result<(), BridgeError> {
    unsafe { keyed_mutex.ReleaseSync(key as u64) }.map_err(|_| BridgeError::KeyedMutexTimeout)
}

pub fn validate_swapchain_create(
    mip_levels: u32,
    array_size: u32,
    is_d3d11_binding: bool,
) -> Result<(), BridgeError> {
    if !is_d3d11_binding {
        return Err(BridgeError::Unsupported("only the D3D11 graphics binding is supported"));
    }
    validate_create_params(mip_levels, array_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mip_mapped_swapchains() {
        assert!(validate_swapchain_create(2, 1, true).is_err());
    }

    #[test]
    fn rejects_array_swapchains() {
        assert!(validate_swapchain_create(1, 2, true).is_err());
    }

    #[test]
    fn rejects_non_d3d11_binding() {
        assert!(validate_swapchain_create(1, 1, false).is_err());
    }

    #[test]
    fn accepts_plain_swapchain() {
        assert!(validate_swapchain_create(1, 1, true).is_ok());
    }

    #[test]
    fn keyed_mutex_keys_match_spec_convention() {
        assert_eq!(KeyedMutexKey::Overlay as u64, 0);
        assert_eq!(KeyedMutexKey::Main as u64, 1);
    }
}
