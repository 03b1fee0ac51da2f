//! Negotiation & worker (C9): process-wide handshake that precedes a
//! connection's own `Transport`, plus the bookkeeping around spawning and
//! tearing down a connection's main-side worker thread. Grounded on the
//! main-side accept-and-spawn-thread loop in `core/src/lib.rs`'s
//! `RenderEventLoop::run`, adapted from a socket accept to a named
//! shared-memory handshake since there is no listening socket here.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use log::{error, info};
use thiserror::Error;

use crate::ipc::{NamedSemaphore, SerializationMutex, SharedRegion};

pub const SUPPORTED_VERSION: u32 = 1;

#[derive(Error, Debug, Clone, Copy)]
pub enum NegotiationError {
    #[error("overlay requested version {requested}, this build supports {supported}")]
    VersionMismatch { requested: u32, supported: u32 },
    #[error("handshake timed out waiting for a peer")]
    HandshakeTimedOut,
    #[error("failed to set up negotiation channel: {0}")]
    SetupFailed(&'static str),
}

/// First-contact payload exchanged over the negotiation region. `accepted`
/// doubles as the main side's go/no-go flag: the overlay only proceeds to
/// open its own per-connection region once it observes `accepted != 0`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct NegotiationSlot {
    requested_version: u32,
    overlay_pid: u32,
    connection_id: u32,
    accepted: u32,
}

/// Result of a successful handshake: enough for the caller to construct the
/// connection's own per-connection IPC primitives (C1) and session context.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeResult {
    pub connection_id: u32,
    pub overlay_pid: u32,
}

/// Process-wide negotiation channel. One instance lives for the lifetime of
/// the main process; [`NegotiationListener::accept`] is called in a loop
/// from the main thread (§4.9 "main thread loops back to accept another
/// overlay").
pub struct NegotiationListener {
    region: SharedRegion,
    mutex: SerializationMutex,
    hello: NamedSemaphore,
    ack: NamedSemaphore,
    next_connection_id: AtomicU32,
    handshake_timeout: Duration,
}

impl NegotiationListener {
    pub fn create(region_name: &str, handshake_timeout: Duration) -> Result<Self, NegotiationError> {
        let region = SharedRegion::create(&format!("{region_name}-region"), std::mem::size_of::<NegotiationSlot>())
            .map_err(|_| NegotiationError::SetupFailed("shared region"))?;
        let mutex = SerializationMutex::create(&format!("{region_name}-mutex"))
            .map_err(|_| NegotiationError::SetupFailed("serialization mutex"))?;
        let hello = NamedSemaphore::create(&format!("{region_name}-hello"), 0, 1)
            .map_err(|_| NegotiationError::SetupFailed("hello semaphore"))?;
        let ack = NamedSemaphore::create(&format!("{region_name}-ack"), 0, 1)
            .map_err(|_| NegotiationError::SetupFailed("ack semaphore"))?;
        Ok(NegotiationListener {
            region,
            mutex,
            hello,
            ack,
            next_connection_id: AtomicU32::new(1),
            handshake_timeout,
        })
    }

    /// Blocks until an overlay signals hello, checks its requested version,
    /// and either rejects it (version mismatch logged at `error`, left for
    /// the caller to report) or assigns it a connection id and acks.
    pub fn accept(&mut self) -> Result<HandshakeResult, NegotiationError> {
        if !self
            .hello
            .wait(self.handshake_timeout)
            .map_err(|_| NegotiationError::SetupFailed("hello wait"))?
        {
            return Err(NegotiationError::HandshakeTimedOut);
        }

        let guard = self.mutex.lock();
        let slot: NegotiationSlot = *bytemuck::from_bytes(self.region.as_bytes());

        if slot.requested_version != SUPPORTED_VERSION {
            error!(
                "negotiation: overlay pid {} requested version {}, supported {}",
                slot.overlay_pid, slot.requested_version, SUPPORTED_VERSION
            );
            let rejected = NegotiationSlot { accepted: 0, ..slot };
            self.region.as_bytes_mut().copy_from_slice(bytemuck::bytes_of(&rejected));
            drop(guard);
            self.ack
                .signal()
                .map_err(|_| NegotiationError::SetupFailed("ack signal"))?;
            return Err(NegotiationError::VersionMismatch {
                requested: slot.requested_version,
                supported: SUPPORTED_VERSION,
            });
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let accepted = NegotiationSlot {
            connection_id,
            accepted: 1,
            ..slot
        };
        self.region.as_bytes_mut().copy_from_slice(bytemuck::bytes_of(&accepted));
        drop(guard);
        self.ack
            .signal()
            .map_err(|_| NegotiationError::SetupFailed("ack signal"))?;

        info!(
            "negotiation: accepted overlay pid {} as connection {}",
            slot.overlay_pid, connection_id
        );
        Ok(HandshakeResult {
            connection_id,
            overlay_pid: slot.overlay_pid,
        })
    }
}

/// Overlay-side half of the handshake: opens the channel the main process
/// already created, submits a version request, and waits for the ack.
pub fn request_connection(
    region_name: &str,
    overlay_pid: u32,
    handshake_timeout: Duration,
) -> Result<HandshakeResult, NegotiationError> {
    let mut region = SharedRegion::create(&format!("{region_name}-region"), std::mem::size_of::<NegotiationSlot>())
        .map_err(|_| NegotiationError::SetupFailed("shared region"))?;
    let mutex = SerializationMutex::create(&format!("{region_name}-mutex"))
        .map_err(|_| NegotiationError::SetupFailed("serialization mutex"))?;
    let hello = NamedSemaphore::open(&format!("{region_name}-hello"))
        .map_err(|_| NegotiationError::SetupFailed("hello semaphore"))?;
    let ack = NamedSemaphore::open(&format!("{region_name}-ack"))
        .map_err(|_| NegotiationError::SetupFailed("ack semaphore"))?;

    {
        let _guard = mutex.lock();
        let slot = NegotiationSlot {
            requested_version: SUPPORTED_VERSION,
            overlay_pid,
            connection_id: 0,
            accepted: 0,
        };
        region.as_bytes_mut().copy_from_slice(bytemuck::bytes_of(&slot));
    }

    hello
        .signal()
        .map_err(|_| NegotiationError::SetupFailed("hello signal"))?;

    if !ack
        .wait(handshake_timeout)
        .map_err(|_| NegotiationError::SetupFailed("ack wait"))?
    {
        return Err(NegotiationError::HandshakeTimedOut);
    }

    let _guard = mutex.lock();
    let slot: NegotiationSlot = *bytemuck::from_bytes(region.as_bytes());
    drop(_guard);

    if slot.accepted == 0 {
        return Err(NegotiationError::VersionMismatch {
            requested: SUPPORTED_VERSION,
            supported: SUPPORTED_VERSION,
        });
    }

    Ok(HandshakeResult {
        connection_id: slot.connection_id,
        overlay_pid: slot.overlay_pid,
    })
}

/// Spawns a connection's main-side worker thread. Catches a panic inside
/// `work` so one crashed connection doesn't take the negotiation loop down
/// with it (§4.9 "worker-thread panics ... log at error").
pub fn spawn_worker<F>(connection_id: u32, work: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::spawn(move || {
        info!("worker for connection {connection_id} starting");
        let result = panic::catch_unwind(AssertUnwindSafe(work));
        match result {
            Ok(()) => info!("worker for connection {connection_id} exited cleanly"),
            Err(_) => error!("worker for connection {connection_id} panicked"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_worker_survives_a_panicking_task() {
        let handle = spawn_worker(1, || panic!("boom"));
        assert!(handle.join().is_ok(), "spawn_worker must catch the panic itself");
    }

    #[test]
    fn spawn_worker_runs_normal_work_to_completion() {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = spawn_worker(2, move || {
            tx.send(()).unwrap();
        });
        handle.join().unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
