//! Wire format shared by the two sides of a connection: the region `Header`
//! and the closed set of request kinds it can carry. Grounded on
//! `IPCXrHeader`/`IPC_XR_*` in the reference implementation's
//! `xr_overlay_dll.h`, adapted to a fixed-size, `bytemuck`-safe layout so it
//! can be written directly into the shared region without a serializer.

use bytemuck::{Pod, Zeroable};

pub const FIXUP_TABLE_CAPACITY: usize = 128;

/// Laid into the first bytes of every connection's shared region. Every
/// field is fixed-size and the struct carries no padding beyond what
/// `repr(C)` already guarantees, so it round-trips through shared memory
/// byte-for-byte between processes that agree on this layout.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Header {
    pub request_kind: u64,
    pub result_code: i32,
    pub fixup_count: i32,
    pub fixup_offsets: [u64; FIXUP_TABLE_CAPACITY],
    /// Arena offset of the head of an input record chain carried in this
    /// request's payload, or 0 if the request carries no chain.
    pub chain_head_offset: u64,
    /// The primary handle argument a mediated call operates on (the
    /// swapchain being acquired, the space being destroyed, ...). 0 when the
    /// call takes none.
    pub argument_handle: u64,
    /// A duplicated D3D shared-NT-texture handle passed alongside a
    /// swapchain-image operation.
    pub shared_texture_handle: u64,
    /// The call's handle-sized result: a newly registered local handle, an
    /// acquired image index, or 0.
    pub result_handle: u64,
}

impl Header {
    pub fn new(request_kind: RequestKind) -> Self {
        Header {
            request_kind: request_kind as u64,
            result_code: 0,
            fixup_count: 0,
            fixup_offsets: [0; FIXUP_TABLE_CAPACITY],
            chain_head_offset: 0,
            argument_handle: 0,
            shared_texture_handle: 0,
            result_handle: 0,
        }
    }

    pub fn request_kind(&self) -> Option<RequestKind> {
        RequestKind::from_u64(self.request_kind)
    }
}

/// The closed enumeration of mediated operations (spec §6). Command
/// passthroughs that carry no cross-process state of their own are out of
/// scope for this engine and are not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum RequestKind {
    Handshake = 0,
    CreateInstance,
    CreateSession,
    DestroySession,
    BeginSession,
    EndSession,
    RequestExitSession,
    CreateReferenceSpace,
    DestroySpace,
    LocateSpace,
    EnumerateSwapchainFormats,
    CreateSwapchain,
    DestroySwapchain,
    AcquireSwapchainImage,
    WaitSwapchainImage,
    ReleaseSwapchainImage,
    BeginFrame,
    WaitFrame,
    EndFrame,
    EnumerateViewConfigurations,
    EnumerateViewConfigurationViews,
    GetViewConfigurationProperties,
    GetInstanceProperties,
    GetSystem,
    GetSystemProperties,
    GetD3D11GraphicsRequirements,
    PollEvent,
    EnumerateInstanceExtensionProperties,
}

impl RequestKind {
    const ALL: &'static [RequestKind] = &[
        RequestKind::Handshake,
        RequestKind::CreateInstance,
        RequestKind::CreateSession,
        RequestKind::DestroySession,
        RequestKind::BeginSession,
        RequestKind::EndSession,
        RequestKind::RequestExitSession,
        RequestKind::CreateReferenceSpace,
        RequestKind::DestroySpace,
        RequestKind::LocateSpace,
        RequestKind::EnumerateSwapchainFormats,
        RequestKind::CreateSwapchain,
        RequestKind::DestroySwapchain,
        RequestKind::AcquireSwapchainImage,
        RequestKind::WaitSwapchainImage,
        RequestKind::ReleaseSwapchainImage,
        RequestKind::BeginFrame,
        RequestKind::WaitFrame,
        RequestKind::EndFrame,
        RequestKind::EnumerateViewConfigurations,
        RequestKind::EnumerateViewConfigurationViews,
        RequestKind::GetViewConfigurationProperties,
        RequestKind::GetInstanceProperties,
        RequestKind::GetSystem,
        RequestKind::GetSystemProperties,
        RequestKind::GetD3D11GraphicsRequirements,
        RequestKind::PollEvent,
        RequestKind::EnumerateInstanceExtensionProperties,
    ];

    pub fn from_u64(value: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| *kind as u64 == value)
    }
}
