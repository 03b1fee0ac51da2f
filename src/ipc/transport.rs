//! Per-connection synchronous RPC channel (C1): shared region + paired
//! semaphores + a duplicated peer process handle. Shaped after
//! `socket_lib`'s sender/listener split, adapted from a socket stream to
//! named shared memory and semaphores, since the underlying transport here
//! is not a byte stream but a single rendezvous buffer.

use std::time::Duration;

use log::{debug, trace, warn};
use thiserror::Error;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Threading::WaitForMultipleObjects;

use super::semaphore::NamedSemaphore;
use super::shared_region::{SerializationMutex, SharedRegion};
use crate::protocol::Header;

#[derive(Error, Debug, Clone, Copy)]
pub enum TransportError {
    #[error("peer process terminated")]
    PeerTerminated,
    #[error("wait on IPC semaphore failed")]
    WaitFailed(#[source] WaitFailure),
    #[error("shared region too small: needs {needed}, has {available}")]
    RegionTooSmall { needed: usize, available: usize },
}

#[derive(Error, Debug, Clone, Copy)]
#[error("semaphore wait returned an unexpected status")]
pub struct WaitFailure;

/// One connection's IPC primitives. Constructed once per connection and
/// shared between the caller's thread (overlay side) or the worker thread
/// (main side); §4.1 guarantees at most one outstanding request at a time,
/// so no internal locking beyond the serialization mutex is needed here.
pub struct Transport {
    region: SharedRegion,
    request_ready: NamedSemaphore,
    response_ready: NamedSemaphore,
    mutex: SerializationMutex,
    peer_process: HANDLE,
    poll_period: Duration,
}

impl Transport {
    pub fn new(
        region: SharedRegion,
        request_ready: NamedSemaphore,
        response_ready: NamedSemaphore,
        mutex: SerializationMutex,
        peer_process: HANDLE,
        poll_period: Duration,
    ) -> Self {
        Transport {
            region,
            request_ready,
            response_ready,
            mutex,
            peer_process,
            poll_period,
        }
    }

    /// Overlay-side call: writes `header` and `payload` into the region,
    /// signals request-ready, then blocks until response-ready or peer
    /// death. On success returns the response header and the payload bytes
    /// the main side wrote back.
    pub fn submit(&mut self, header: Header, payload: &[u8]) -> Result<(Header, Vec<u8>), TransportError> {
        {
            let _guard = self.mutex.lock();
            if payload.len() > self.region.payload().len() {
                return Err(TransportError::RegionTooSmall {
                    needed: payload.len(),
                    available: self.region.payload().len(),
                });
            }
            *self.region.header_mut() = header;
            self.region.payload_mut()[..payload.len()].copy_from_slice(payload);
        }

        self.request_ready
            .signal()
            .map_err(|_| TransportError::WaitFailed(WaitFailure))?;
        trace!("submit: request-ready signaled, waiting for response");

        self.wait_for_peer(&self.response_ready)?;

        let guard = self.mutex.lock();
        let response_header = *self.region.header();
        let response_payload = self.region.payload().to_vec();
        drop(guard);
        Ok((response_header, response_payload))
    }

    /// Main-side worker call: blocks until the overlay signals
    /// request-ready or dies, then hands the caller the request header and
    /// payload bytes to dispatch. The caller writes the response in place
    /// and calls [`Transport::reply`].
    pub fn receive(&mut self) -> Result<(Header, Vec<u8>), TransportError> {
        self.wait_for_peer(&self.request_ready)?;
        let guard = self.mutex.lock();
        let header = *self.region.header();
        let payload = self.region.payload().to_vec();
        drop(guard);
        debug!("receive: request kind {:?}", header.request_kind());
        Ok((header, payload))
    }

    pub fn reply(&mut self, header: Header, payload: &[u8]) -> Result<(), TransportError> {
        {
            let _guard = self.mutex.lock();
            *self.region.header_mut() = header;
            self.region.payload_mut()[..payload.len()].copy_from_slice(payload);
        }
        self.response_ready
            .signal()
            .map_err(|_| TransportError::WaitFailed(WaitFailure))
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn region_mut(&mut self) -> &mut SharedRegion {
        &mut self.region
    }

    /// Short-polls `signal` against the peer process handle so that a dead
    /// peer is detected within one poll period instead of hanging forever,
    /// per §4.1's "short poll (~500ms), multi-wait" contract.
    fn wait_for_peer(&self, signal: &NamedSemaphore) -> Result<(), TransportError> {
        loop {
            let handles = [signal.raw(), self.peer_process];
            let wait = unsafe {
                WaitForMultipleObjects(&handles, false, self.poll_period.as_millis() as u32)
            };
            match wait.0 {
                0 => return Ok(()), // WAIT_OBJECT_0: signal fired
                1 => {
                    warn!("peer process handle signaled, connection is dead");
                    return Err(TransportError::PeerTerminated);
                }
                258 => continue, // WAIT_TIMEOUT: keep polling
                _ => return Err(TransportError::WaitFailed(WaitFailure)),
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.peer_process);
        }
    }
}
