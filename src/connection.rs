//! Ties C1-C9 together into one connection between an overlay process and
//! the main process: the per-connection worker loop that reads a request
//! off the transport, classifies it, mediates it against the session state
//! machine / handle registry / texture bridge / event queue / composition
//! store, and replies. Grounded on `RemoteControl`'s composition-of-
//! subsystems shape in `core/src/lib.rs`, generalized from its dispatch
//! thread to this engine's mediated-operation set.

use std::collections::HashMap;

use log::{debug, error, info, warn};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::Arc;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext};

use crate::composition::{CompositionStore, Layer};
use crate::config::EngineConfig;
use crate::dispatch::{classify, OperationClass};
use crate::error::EngineError;
use crate::events::{self, EventQueue, QueuedEvent};
use crate::handle::{HandleKind, HandleRegistry, LocalHandle};
use crate::ipc::{Transport, TransportError};
use crate::marshal::{self, copy_out_chain, marshal_chain, Arena, CopyMode, FixupTable, Record};
use crate::negotiation::HandshakeResult;
use crate::protocol::{Header, RequestKind};
use crate::session::{MainState, MainTracker, OverlayCommand, OverlayTracker, SyntheticStateChange};
use crate::texture_bridge::SwapchainBridgeEntry;
use crate::utils::clock::Clock;

/// The boundary to the real immersive runtime and its D3D11 device, treated
/// as an external collaborator per the out-of-scope passthrough commands:
/// this engine mediates, it does not reimplement the runtime. A production
/// host process provides the concrete implementation; tests provide an
/// in-process fake (C11).
pub trait RuntimeBackend: Send {
    fn create_instance(&mut self) -> Result<u64, EngineError>;
    fn create_session(&mut self, instance: u64) -> Result<u64, EngineError>;
    fn destroy_session(&mut self, session: u64) -> Result<(), EngineError>;
    fn create_reference_space(&mut self, session: u64) -> Result<u64, EngineError>;
    fn destroy_space(&mut self, space: u64) -> Result<(), EngineError>;
    fn create_swapchain(&mut self, session: u64) -> Result<u64, EngineError>;
    fn destroy_swapchain(&mut self, swapchain: u64) -> Result<(), EngineError>;
    fn swapchain_image_count(&mut self, swapchain: u64) -> Result<usize, EngineError>;
    fn acquire_swapchain_image(&mut self, swapchain: u64) -> Result<usize, EngineError>;
    fn wait_swapchain_image(&mut self, swapchain: u64, index: usize) -> Result<(), EngineError>;
    /// Duplicates the runtime image at `index` into a shared NT handle the
    /// overlay process can open, for the keyed-mutex handoff in
    /// `texture_bridge`.
    fn duplicate_swapchain_handle(&mut self, swapchain: u64, index: usize) -> Result<u64, EngineError>;
    fn poll_main_state(&mut self, session: u64) -> Result<MainState, EngineError>;
    fn main_has_waited_frame(&mut self, session: u64) -> bool;
    fn wait_frame(&mut self, session: u64) -> Result<(), EngineError>;
    fn end_frame(&mut self, session: u64, injected: &[Layer]) -> Result<(), EngineError>;
    /// Executes an unmediated command passthrough (the "thousand or so
    /// straightforward" ones out of scope for this engine) and returns
    /// whatever result code the runtime produced.
    fn passthrough(&mut self, kind: RequestKind) -> Result<i32, EngineError>;

    /// The bound D3D11 device and immediate context, if this backend has
    /// one. `None` (the default) lets a GPU-less test double still exercise
    /// every other part of the swapchain bridge's bookkeeping; a production
    /// backend returns `Some` so `SwapchainBridgeEntry::copy_released_image`
    /// runs for real.
    fn d3d_device(&self) -> Option<(&ID3D11Device, &ID3D11DeviceContext)> {
        None
    }
}

/// What a mediated handler hands back to `run`: a result code, an optional
/// handle-sized result value, an optional duplicated-texture handle, and an
/// optional payload (event bytes, mostly).
struct MediatedReply {
    result_code: i32,
    result_handle: u64,
    shared_texture_handle: u64,
    payload: Vec<u8>,
}

impl MediatedReply {
    fn ok() -> Self {
        MediatedReply {
            result_code: 0,
            result_handle: 0,
            shared_texture_handle: 0,
            payload: Vec::new(),
        }
    }

    fn ok_code(result_code: i32) -> Self {
        MediatedReply { result_code, ..Self::ok() }
    }

    fn with_handle(local: LocalHandle) -> Self {
        MediatedReply { result_handle: local.raw(), ..Self::ok() }
    }

    fn with_shared_handle(result_handle: u64, shared_texture_handle: u64) -> Self {
        MediatedReply { result_handle, shared_texture_handle, ..Self::ok() }
    }

    fn with_payload(result_code: i32, payload: Vec<u8>) -> Self {
        MediatedReply { result_code, payload, ..Self::ok() }
    }
}

struct ConnectionState {
    main: MainTracker,
    overlay: OverlayTracker,
    events: EventQueue,
    composition: CompositionStore,
    bridge_entries: HashMap<LocalHandle, SwapchainBridgeEntry>,
    main_session: Option<u64>,
    /// The overlay's own session handle, set on `CreateSession` and used to
    /// rewrite the session identifier embedded in outgoing events.
    overlay_session_local: Option<LocalHandle>,
    /// A synthetic overlay state transition observed during `WaitFrame` but
    /// not yet delivered; `PollEvent` must surface this ahead of anything
    /// already queued (§4.7's "synthetic first" rule).
    pending_synthetic: Option<SyntheticStateChange>,
}

/// One logical channel between an overlay process and the main process.
/// §5's cross-cutting reentrant mutex is `state`: every mediated operation
/// acquires it on entry and releases it on return, including the texture
/// bridge's keyed-mutex calls, which is safe because those synchronize
/// across processes with their own timeout discipline rather than against
/// other threads in this one.
pub struct Connection {
    pub id: u32,
    pub overlay_pid: u32,
    transport: Transport,
    registry: HandleRegistry,
    state: ReentrantMutex<RefCell<ConnectionState>>,
}

impl Connection {
    pub fn new(handshake: HandshakeResult, transport: Transport, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Connection {
            id: handshake.connection_id,
            overlay_pid: handshake.overlay_pid,
            transport,
            registry: HandleRegistry::new(),
            state: ReentrantMutex::new(RefCell::new(ConnectionState {
                main: MainTracker::default(),
                overlay: OverlayTracker::new(clock),
                events: EventQueue::new(config.event_queue_capacity),
                composition: CompositionStore::new(config.layer_budget()),
                bridge_entries: HashMap::new(),
                main_session: None,
                overlay_session_local: None,
                pending_synthetic: None,
            })),
        }
    }

    /// Read-dispatch-reply loop, run on this connection's dedicated
    /// main-side worker thread until the transport reports the overlay is
    /// gone. Every step is wrapped so a connection-ending error tears down
    /// cleanly instead of propagating out of the worker (§4.9).
    pub fn run(&mut self, backend: &mut dyn RuntimeBackend) {
        loop {
            let (header, mut payload) = match self.transport.receive() {
                Ok(pair) => pair,
                Err(TransportError::PeerTerminated) => {
                    info!("connection {}: overlay terminated, tearing down", self.id);
                    break;
                }
                Err(err) => {
                    error!("connection {}: transport receive failed: {err}", self.id);
                    break;
                }
            };

            let Some(kind) = header.request_kind() else {
                warn!("connection {}: unrecognized request kind {}", self.id, header.request_kind);
                continue;
            };

            let reply = match self.handle(kind, &header, &mut payload, backend) {
                Ok(reply) => reply,
                Err(err) => {
                    error!("connection {}: {kind:?} failed: {err}", self.id);
                    MediatedReply::ok_code(-1)
                }
            };

            let mut reply_header = Header::new(kind);
            reply_header.result_code = reply.result_code;
            reply_header.result_handle = reply.result_handle;
            reply_header.shared_texture_handle = reply.shared_texture_handle;
            if let Err(err) = self.transport.reply(reply_header, &reply.payload) {
                error!("connection {}: reply failed: {err}", self.id);
                break;
            }
        }

        self.teardown(backend);
    }

    fn handle(
        &mut self,
        kind: RequestKind,
        header: &Header,
        payload: &mut [u8],
        backend: &mut dyn RuntimeBackend,
    ) -> Result<MediatedReply, EngineError> {
        match classify(kind) {
            OperationClass::Passthrough | OperationClass::LocalOnly => {
                backend.passthrough(kind).map(MediatedReply::ok_code)
            }
            OperationClass::Mediated => self.handle_mediated(kind, header, payload, backend),
        }
    }

    fn handle_mediated(
        &mut self,
        kind: RequestKind,
        header: &Header,
        payload: &mut [u8],
        backend: &mut dyn RuntimeBackend,
    ) -> Result<MediatedReply, EngineError> {
        let cell = self.state.lock();
        let mut state = cell.borrow_mut();

        match kind {
            RequestKind::Handshake => Ok(MediatedReply::ok()),

            RequestKind::CreateInstance => {
                let instance = backend.create_instance()?;
                let local = self.registry.register(HandleKind::Instance, instance)?;
                debug!("connection {}: instance {:#x} -> {local:?}", self.id, instance);
                Ok(MediatedReply::with_handle(local))
            }

            RequestKind::CreateSession => {
                let instance_local = LocalHandle::from_raw(header.argument_handle);
                let instance = self.registry.resolve(instance_local, HandleKind::Instance)?;
                let session = backend.create_session(instance)?;
                state.main_session = Some(session);
                let local = self.registry.register(HandleKind::Session, session)?;
                state.overlay_session_local = Some(local);
                debug!("connection {}: session {:#x} -> {local:?}", self.id, session);
                Ok(MediatedReply::with_handle(local))
            }

            RequestKind::DestroySession => {
                if let Some(session) = state.main_session.take() {
                    backend.destroy_session(session)?;
                }
                state.overlay_session_local = None;
                Ok(MediatedReply::ok())
            }

            RequestKind::BeginSession => {
                state.overlay.apply_command(OverlayCommand::Begin, &state.main)?;
                Ok(MediatedReply::ok())
            }
            RequestKind::EndSession => {
                state.overlay.apply_command(OverlayCommand::End, &state.main)?;
                Ok(MediatedReply::ok())
            }
            RequestKind::RequestExitSession => {
                state.overlay.apply_command(OverlayCommand::RequestExit, &state.main)?;
                Ok(MediatedReply::ok())
            }

            RequestKind::CreateReferenceSpace => {
                let session = state.main_session.ok_or(EngineError::CallOrderInvalid("no session"))?;
                let arena = Arena::new(payload);
                let chain = copy_out_chain(&arena, header.chain_head_offset as usize, 1);
                if let Some(Record::ReferenceSpaceCreateInfo { space_type, .. }) = chain.first() {
                    debug!("connection {}: create-reference-space space_type={space_type}", self.id);
                }
                let space = backend.create_reference_space(session)?;
                let local = self.registry.register(HandleKind::Space, space)?;
                Ok(MediatedReply::with_handle(local))
            }

            RequestKind::DestroySpace => {
                let local = LocalHandle::from_raw(header.argument_handle);
                let actual = self.registry.resolve(local, HandleKind::Space)?;
                if state.composition.is_referenced(local) {
                    state.composition.defer_destroy(local);
                    debug!("connection {}: deferring destroy of {local:?}, still referenced", self.id);
                } else {
                    backend.destroy_space(actual)?;
                    self.registry.forget(local);
                }
                Ok(MediatedReply::ok())
            }

            RequestKind::CreateSwapchain => {
                let session = state.main_session.ok_or(EngineError::CallOrderInvalid("no session"))?;
                let arena = Arena::new(payload);
                let chain = copy_out_chain(&arena, header.chain_head_offset as usize, 1);
                if let Some(Record::SwapchainCreateInfo { width, height, format, .. }) = chain.first() {
                    debug!("connection {}: create-swapchain {width}x{height} format={format}", self.id);
                }
                let swapchain = backend.create_swapchain(session)?;
                let local = self.registry.register(HandleKind::Swapchain, swapchain)?;
                let image_count = backend.swapchain_image_count(swapchain)?;
                state
                    .bridge_entries
                    .insert(local, SwapchainBridgeEntry::new(Vec::with_capacity(image_count)));
                Ok(MediatedReply::with_handle(local))
            }

            RequestKind::DestroySwapchain => {
                let local = LocalHandle::from_raw(header.argument_handle);
                let actual = self.registry.resolve(local, HandleKind::Swapchain)?;
                if state.composition.is_referenced(local) {
                    state.composition.defer_destroy(local);
                } else {
                    if let Some(mut entry) = state.bridge_entries.remove(&local) {
                        entry.force_release_all();
                    }
                    backend.destroy_swapchain(actual)?;
                    self.registry.forget(local);
                }
                Ok(MediatedReply::ok())
            }

            RequestKind::AcquireSwapchainImage => {
                let local = LocalHandle::from_raw(header.argument_handle);
                let actual = self.registry.resolve(local, HandleKind::Swapchain)?;
                let index = backend.acquire_swapchain_image(actual)?;
                let shared = backend.duplicate_swapchain_handle(actual, index)?;
                let entry = state
                    .bridge_entries
                    .get_mut(&local)
                    .ok_or(EngineError::HandleInvalid(actual))?;
                entry.mark_acquired(index);
                entry.mark_held_by_overlay(HANDLE(shared as isize));
                Ok(MediatedReply::with_shared_handle(index as u64, shared))
            }

            RequestKind::WaitSwapchainImage => {
                let local = LocalHandle::from_raw(header.argument_handle);
                let actual = self.registry.resolve(local, HandleKind::Swapchain)?;
                let entry = state
                    .bridge_entries
                    .get(&local)
                    .ok_or(EngineError::HandleInvalid(actual))?;
                let index = entry.front_acquired()?;
                backend.wait_swapchain_image(actual, index)?;
                Ok(MediatedReply::ok())
            }

            RequestKind::ReleaseSwapchainImage => {
                let local = LocalHandle::from_raw(header.argument_handle);
                let actual = self.registry.resolve(local, HandleKind::Swapchain)?;
                let entry = state
                    .bridge_entries
                    .get_mut(&local)
                    .ok_or(EngineError::HandleInvalid(actual))?;
                let index = entry.pop_released()?;
                let shared = HANDLE(header.shared_texture_handle as isize);
                if let Some((device, context)) = backend.d3d_device() {
                    entry.copy_released_image(device, context, shared, index)?;
                } else {
                    debug!("connection {}: no D3D device bound, skipping keyed-mutex copy", self.id);
                    entry.clear_held(shared);
                }
                Ok(MediatedReply::ok())
            }

            RequestKind::BeginFrame => Ok(MediatedReply::ok()),

            RequestKind::WaitFrame => {
                let session = state.main_session.ok_or(EngineError::CallOrderInvalid("no session"))?;
                let main_state = backend.poll_main_state(session)?;
                state.main.observe(main_state);
                if backend.main_has_waited_frame(session) {
                    state.main.observe_wait_frame();
                }
                backend.wait_frame(session)?;
                if let Some(change) = state.overlay.reconcile(&state.main) {
                    debug!("connection {}: synthetic transition -> {:?}", self.id, change.to);
                    state.pending_synthetic = Some(change);
                }
                Ok(MediatedReply::ok())
            }

            RequestKind::EndFrame => {
                let session = state.main_session.ok_or(EngineError::CallOrderInvalid("no session"))?;
                let arena = Arena::new(payload);
                let chain = copy_out_chain(&arena, header.chain_head_offset as usize, 4);

                let mut placement = state.composition.placement();
                let mut submitted = Vec::with_capacity(chain.len());
                for (i, record) in chain.iter().enumerate() {
                    if let Record::CompositionLayerQuad { placement: p, swapchain, space, .. } = record {
                        if i == 0 {
                            placement = *p;
                        }
                        submitted.push(Layer {
                            swapchain: LocalHandle::from_raw(*swapchain),
                            space: LocalHandle::from_raw(*space),
                        });
                    }
                }

                state.composition.submit(&submitted, placement)?;

                let layers = state.composition.layers().to_vec();
                backend.end_frame(session, &layers)?;
                for handle in state.composition.drain_ready_destroys() {
                    debug!("connection {}: issuing deferred destroy for {handle:?}", self.id);
                    self.registry.forget(handle);
                }
                Ok(MediatedReply::ok())
            }

            RequestKind::PollEvent => {
                if let Some(change) = state.pending_synthetic.take() {
                    let session_local = state.overlay_session_local.unwrap_or_else(|| LocalHandle::from_raw(0));
                    let payload = encode_session_state_changed(session_local.raw(), change);
                    Ok(MediatedReply::with_payload(1, payload))
                } else {
                    match state.events.pop() {
                        Some(QueuedEvent::Ordinary { mut payload }) => {
                            if let Some(session_local) = state.overlay_session_local {
                                if payload.len() >= events::ORDINARY_EVENT_SESSION_OFFSET + 8 {
                                    events::rewrite_session_identifier(
                                        &mut payload,
                                        events::ORDINARY_EVENT_SESSION_OFFSET,
                                        session_local,
                                    );
                                }
                            }
                            Ok(MediatedReply::with_payload(1, payload))
                        }
                        Some(QueuedEvent::LostEvents { count }) => {
                            warn!("connection {}: {count} events lost to queue overflow", self.id);
                            Ok(MediatedReply::ok_code(2))
                        }
                        None => Ok(MediatedReply::ok()),
                    }
                }
            }

            RequestKind::LocateSpace => Ok(MediatedReply::ok()),
            _ => backend.passthrough(kind).map(MediatedReply::ok_code),
        }
    }

    /// Connection-loss teardown (§4.9): release anything still held by the
    /// overlay, clear deferred-destroy bookkeeping, drop the handle
    /// registry. The transport's own `Drop` closes the duplicated process
    /// handle and the IPC primitives.
    fn teardown(&mut self, backend: &mut dyn RuntimeBackend) {
        let cell = self.state.lock();
        let mut state = cell.borrow_mut();

        for entry in state.bridge_entries.values_mut() {
            entry.force_release_all();
        }
        state.bridge_entries.clear();

        if let Some(session) = state.main_session.take() {
            if let Err(err) = backend.destroy_session(session) {
                warn!("connection {}: teardown destroy_session failed: {err}", self.id);
            }
        }

        info!("connection {}: torn down, {} handles forgotten", self.id, self.registry.len());
    }
}

/// Builds an `EventDataSessionStateChanged` record's wire bytes for a
/// synthetic overlay transition, reusing the same arena/fixup machinery real
/// chains go through rather than hand-laying out the struct.
fn encode_session_state_changed(session: u64, change: SyntheticStateChange) -> Vec<u8> {
    let chain = vec![Record::EventDataSessionStateChanged {
        kind: marshal::KIND_EVENT_DATA_SESSION_STATE_CHANGED,
        session,
        state: change.to as u32,
        time: change.timestamp,
    }];

    let mut header = Header::new(RequestKind::PollEvent);
    let mut backing = vec![0u8; 64];
    {
        let mut arena = Arena::new(&mut backing);
        let mut fixups = FixupTable::new(&mut header);
        marshal_chain(&chain, CopyMode::CopyEverything, &mut arena, &mut fixups)
            .expect("fixed-size event record fits the scratch arena");
    }
    backing
}

// `Connection` owns a live `Transport`, which needs a real OS-backed shared
// region and semaphores to construct; exercising `handle_mediated` and
// `run` end-to-end belongs to the two-process integration harness (C11),
// which pairs a real `Connection` against a loopback `RuntimeBackend`. The
// constituent pieces `handle_mediated` delegates to — the handle registry,
// session tracker, composition store — have their own unit tests.
