//! Cross-process mediation engine that lets a second ("overlay") process
//! submit compositor layers into a primary immersive-graphics application's
//! ("main") frame stream, without the main application being aware of it.
//!
//! Module map follows the component table: `protocol`/`marshal`/`ipc` are
//! the wire format and transport (C1/C2), `handle` is the bidirectional
//! identifier registry (C3), `dispatch` classifies operations (C4),
//! `texture_bridge` owns the keyed-mutex D3D11 handoff (C5), `session` is
//! the state machine (C6), `events` is the relay (C7), `composition` is the
//! layer injector (C8), `negotiation` is the handshake and worker lifecycle
//! (C9), and `connection` ties all of the above into one overlay<->main
//! channel. `config`/`logging`/`error` are the ambient observability and
//! configuration surface.

pub mod composition;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handle;
pub mod ipc;
pub mod logging;
pub mod marshal;
pub mod negotiation;
pub mod protocol;
pub mod session;
pub mod texture_bridge;

pub mod utils {
    pub mod clock;
}

pub use composition::{CompositionError, CompositionStore, Layer};
pub use config::{ConfigError, EngineConfig};
pub use connection::{Connection, RuntimeBackend};
pub use dispatch::{classify, DispatchError, OperationClass};
pub use error::EngineError;
pub use handle::{HandleKind, HandleRegistry, LocalHandle, RegistryError};
pub use negotiation::{request_connection, spawn_worker, HandshakeResult, NegotiationError, NegotiationListener};
pub use protocol::{Header, RequestKind, FIXUP_TABLE_CAPACITY};
pub use session::{MainState, MainTracker, OverlayCommand, OverlayState, OverlayTracker, StateMachineError};
pub use texture_bridge::{BridgeError, KeyedMutexKey, OverlaySwapchainEntry, SwapchainBridgeEntry};
