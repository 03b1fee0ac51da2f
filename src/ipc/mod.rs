//! IPC transport (C1): named shared memory, paired semaphores, and
//! process-death detection, combined into one synchronous RPC channel per
//! connection.

pub mod semaphore;
pub mod shared_region;
pub mod transport;

pub use semaphore::NamedSemaphore;
pub use shared_region::{SerializationMutex, SharedRegion};
pub use transport::{Transport, TransportError};
