//! Host-process entry point: loads configuration, initializes logging and
//! crash reporting, then runs the negotiation accept loop, spawning one
//! worker thread per accepted overlay connection. Grounded on the
//! `clap::Parser`/`Subcommand` CLI shape used by the test driver binary and
//! on `sentry_utils`'s init flow.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use log::{error, info};
use overlay_engine::composition::Layer;
use overlay_engine::config::EngineConfig;
use overlay_engine::connection::{Connection, RuntimeBackend};
use overlay_engine::error::EngineError;
use overlay_engine::negotiation::{spawn_worker, HandshakeResult, NegotiationListener};
use overlay_engine::protocol::RequestKind;
use overlay_engine::session::MainState;
use overlay_engine::utils::clock::default_clock;
use windows::Win32::System::Threading::{OpenProcess, PROCESS_SYNCHRONIZE};

/// Stands in for the real immersive runtime binding until this crate is
/// wired to one: every mediated call succeeds with a freshly minted id, and
/// every passthrough is a no-op success. `d3d_device` stays at the trait's
/// default `None`, so `release-swapchain-image` falls back to
/// bookkeeping-only in `connection.rs`.
struct NullRuntimeBackend {
    next_id: AtomicU64,
}

impl NullRuntimeBackend {
    fn new() -> Self {
        NullRuntimeBackend { next_id: AtomicU64::new(1) }
    }

    fn alloc(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl RuntimeBackend for NullRuntimeBackend {
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
        Ok(0)
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
        Ok(MainState::Idle)
    }

    fn main_has_waited_frame(&mut self, _session: u64) -> bool {
        false
    }

    fn wait_frame(&mut self, _session: u64) -> Result<(), EngineError> {
        Ok(())
    }

    fn end_frame(&mut self, _session: u64, _injected: &[Layer]) -> Result<(), EngineError> {
        Ok(())
    }

    fn passthrough(&mut self, _kind: RequestKind) -> Result<i32, EngineError> {
        Ok(0)
    }
}

#[derive(Parser)]
#[command(author, version, about = "Overlay mediation engine host process", long_about = None)]
struct Args {
    /// Path to a TOML config file; falls back to compiled defaults plus
    /// environment overrides if omitted or missing.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    overlay_engine::logging::init(&config);
    let _sentry_guard = sentry_utils::init_sentry("overlay-host startup".to_string(), config.sentry_dsn.clone());

    info!("overlay host starting, pid {}", std::process::id());

    let mut listener = match NegotiationListener::create(&config.negotiation_region_name, config.handshake_timeout()) {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to start negotiation listener: {err}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        match listener.accept() {
            Ok(handshake) => {
                info!("accepted connection {} from overlay pid {}", handshake.connection_id, handshake.overlay_pid);
                let config = config.clone();
                spawn_worker(handshake.connection_id, move || {
                    run_connection(handshake, &config);
                });
            }
            Err(overlay_engine::NegotiationError::HandshakeTimedOut) => continue,
            Err(err) => {
                error!("negotiation accept failed: {err}");
            }
        }
    }
}

/// Builds this connection's own IPC primitives (distinct from the
/// process-wide negotiation channel) and runs it to completion. A
/// production build swaps `NullRuntimeBackend` for the real D3D11 device and
/// immersive runtime session; that integration is outside this crate's
/// boundary, same as the command passthroughs it wraps.
fn run_connection(handshake: HandshakeResult, config: &EngineConfig) {
    use overlay_engine::ipc::{NamedSemaphore, SerializationMutex, SharedRegion, Transport};

    let region_name = format!("overlay-engine-conn-{}", handshake.connection_id);
    let region = match SharedRegion::create(&format!("{region_name}-region"), config.shared_region_bytes) {
        Ok(region) => region,
        Err(err) => {
            error!("connection {}: failed to create shared region: {err}", handshake.connection_id);
            return;
        }
    };
    let mutex = match SerializationMutex::create(&format!("{region_name}-mutex")) {
        Ok(mutex) => mutex,
        Err(err) => {
            error!("connection {}: failed to create serialization mutex: {err}", handshake.connection_id);
            return;
        }
    };
    let request_ready = match NamedSemaphore::create(&format!("{region_name}-req"), 0, 1) {
        Ok(sem) => sem,
        Err(err) => {
            error!("connection {}: failed to create request semaphore: {err}", handshake.connection_id);
            return;
        }
    };
    let response_ready = match NamedSemaphore::create(&format!("{region_name}-resp"), 0, 1) {
        Ok(sem) => sem,
        Err(err) => {
            error!("connection {}: failed to create response semaphore: {err}", handshake.connection_id);
            return;
        }
    };
    let peer_process = match unsafe { OpenProcess(PROCESS_SYNCHRONIZE, false, handshake.overlay_pid) } {
        Ok(handle) => handle,
        Err(err) => {
            error!("connection {}: failed to open overlay process: {err}", handshake.connection_id);
            return;
        }
    };

    let transport = Transport::new(region, request_ready, response_ready, mutex, peer_process, config.ipc_poll_period());
    let mut connection = Connection::new(handshake, transport, default_clock(), config);
    let mut backend = NullRuntimeBackend::new();
    connection.run(&mut backend);
}
