//! A `RuntimeBackend` test double standing in for the real immersive
//! runtime and D3D11 device, so the two-process scenarios can drive a real
//! `Connection` without a physical HMD or GPU attached.

use std::sync::atomic::{AtomicU64, Ordering};

use overlay_engine::composition::Layer;
use overlay_engine::session::MainState;
use overlay_engine::{EngineError, RequestKind, RuntimeBackend};

pub struct LoopbackBackend {
    next_handle: AtomicU64,
    main_state: MainState,
    has_waited_frame: bool,
    pub end_frame_calls: Vec<Vec<Layer>>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        LoopbackBackend {
            next_handle: AtomicU64::new(1),
            main_state: MainState::Synchronized,
            has_waited_frame: true,
            end_frame_calls: Vec::new(),
        }
    }

    pub fn set_main_state(&mut self, state: MainState) {
        self.main_state = state;
    }

    fn alloc(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBackend for LoopbackBackend {
    fn create_instance(&mut self) -> Result<u64, EngineError> {
        Ok(self.alloc())
    }

    fn create_session(&mut self, _instance: u64) -> Result<u64, EngineError> {
        Ok(self.alloc())
    }

    fn destroy_session(&mut self, _session: u64) -> Result<(), EngineError> {
        Ok(())
    }

    fn create_reference_space(&mut self, _session: u64) -> Result<u64, EngineError> {
        Ok(self.alloc())
    }

    fn destroy_space(&mut self, _space: u64) -> Result<(), EngineError> {
        Ok(())
    }

    fn create_swapchain(&mut self, _session: u64) -> Result<u64, EngineError> {
        Ok(self.alloc())
    }

    fn destroy_swapchain(&mut self, _swapchain: u64) -> Result<(), EngineError> {
        Ok(())
    }

    fn swapchain_image_count(&mut self, _swapchain: u64) -> Result<usize, EngineError> {
        Ok(3)
    }

    fn acquire_swapchain_image(&mut self, _swapchain: u64) -> Result<usize, EngineError> {
        Ok(0)
    }

    fn wait_swapchain_image(&mut self, _swapchain: u64, _index: usize) -> Result<(), EngineError> {
        Ok(())
    }

    fn duplicate_swapchain_handle(&mut self, _swapchain: u64, _index: usize) -> Result<u64, EngineError> {
        Ok(self.alloc())
    }

    fn poll_main_state(&mut self, _session: u64) -> Result<MainState, EngineError> {
        Ok(self.main_state)
    }

    fn main_has_waited_frame(&mut self, _session: u64) -> bool {
        self.has_waited_frame
    }

    fn wait_frame(&mut self, _session: u64) -> Result<(), EngineError> {
        Ok(())
    }

    fn end_frame(&mut self, _session: u64, injected: &[Layer]) -> Result<(), EngineError> {
        self.end_frame_calls.push(injected.to_vec());
        Ok(())
    }

    fn passthrough(&mut self, _kind: RequestKind) -> Result<i32, EngineError> {
        Ok(0)
    }
}
