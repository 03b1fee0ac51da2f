//! In-process loopback fixtures (C11): builds a real pair of `Transport`s
//! backed by actual OS shared memory and semaphores, wired to the same
//! names so one thread can play the overlay side and another the main
//! side, without needing two separate processes. Grounded on
//! `core/socket_lib`'s `test_pair`-style helper used by the teacher's own
//! integration tests.

use std::time::Duration;

use overlay_engine::ipc::{NamedSemaphore, SerializationMutex, SharedRegion, Transport};
use windows::Win32::System::Threading::GetCurrentProcess;

/// Builds two `Transport`s over the same named shared region: `(main_side,
/// overlay_side)`. Both map the same underlying pages, so a write through
/// one becomes visible to the other exactly as it would across a real
/// process boundary. `peer_process` is this process's own pseudo-handle on
/// both ends, since there's only one process in this harness; it never
/// actually signals, so the liveness path simply never fires here.
pub fn build_pair(name_prefix: &str, region_bytes: usize, poll_period: Duration) -> (Transport, Transport) {
    let main_region = SharedRegion::create(&format!("{name_prefix}-region"), region_bytes)
        .expect("create shared region (main side)");
    let overlay_region = SharedRegion::create(&format!("{name_prefix}-region"), region_bytes)
        .expect("open shared region (overlay side)");

    let main_mutex = SerializationMutex::create(&format!("{name_prefix}-mutex")).expect("create mutex (main side)");
    let overlay_mutex =
        SerializationMutex::create(&format!("{name_prefix}-mutex")).expect("open mutex (overlay side)");

    let request_ready_main =
        NamedSemaphore::create(&format!("{name_prefix}-req"), 0, 1).expect("create request semaphore");
    let request_ready_overlay =
        NamedSemaphore::open(&format!("{name_prefix}-req")).expect("open request semaphore");
    let response_ready_main =
        NamedSemaphore::create(&format!("{name_prefix}-resp"), 0, 1).expect("create response semaphore");
    let response_ready_overlay =
        NamedSemaphore::open(&format!("{name_prefix}-resp")).expect("open response semaphore");

    let main_peer = unsafe { GetCurrentProcess() };
    let overlay_peer = unsafe { GetCurrentProcess() };

    let main_transport = Transport::new(
        main_region,
        request_ready_main,
        response_ready_main,
        main_mutex,
        main_peer,
        poll_period,
    );
    let overlay_transport = Transport::new(
        overlay_region,
        request_ready_overlay,
        response_ready_overlay,
        overlay_mutex,
        overlay_peer,
        poll_period,
    );

    (main_transport, overlay_transport)
}
