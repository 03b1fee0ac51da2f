use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::handle::RegistryError;
use crate::ipc::TransportError;
use crate::marshal::MarshalError;
use crate::negotiation::NegotiationError;
use crate::session::StateMachineError;
use crate::texture_bridge::BridgeError;

/// Top-level error surface returned to a caller of the engine. Every
/// component-level error enum converts into one of these variants; the
/// concept-level taxonomy (not the symbol names) is the one component
/// authors are expected to reason about.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("connection lost")]
    SessionLost,
    #[error("handle {0:#x} invalid or wrong kind")]
    HandleInvalid(u64),
    #[error("call order invalid: {0}")]
    CallOrderInvalid(&'static str),
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("marshal arena out of memory")]
    OutOfMemory,
    #[error("fixup table exhausted")]
    OutOfBufferSpace,
    #[error("peer process terminated")]
    PeerTerminated,
    #[error("runtime returned error code {0}")]
    PropagatedRuntimeError(i32),
    #[error("overlay submitted {submitted} layers, budget is {allowed}")]
    LayerLimitExceeded { submitted: usize, allowed: usize },
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PeerTerminated => EngineError::SessionLost,
            TransportError::WaitFailed(_) => EngineError::PeerTerminated,
            TransportError::RegionTooSmall { .. } => EngineError::OutOfMemory,
        }
    }
}

impl From<MarshalError> for EngineError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::ArenaOverflow { .. } => EngineError::OutOfMemory,
            MarshalError::FixupTableFull => EngineError::OutOfBufferSpace,
            MarshalError::UnalignedRead => EngineError::CallOrderInvalid("unaligned arena read"),
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(local) => EngineError::HandleInvalid(local.raw()),
            RegistryError::KindMismatch { local, .. } => EngineError::HandleInvalid(local.raw()),
            RegistryError::AlreadyBound(actual) => EngineError::HandleInvalid(actual),
        }
    }
}

impl From<DispatchError> for EngineError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownRequestKind(_) => EngineError::Unsupported("request kind"),
            DispatchError::WrongClass { .. } => EngineError::CallOrderInvalid("operation class"),
        }
    }
}

impl From<BridgeError> for EngineError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Unsupported(reason) => EngineError::Unsupported(reason),
            BridgeError::AcquireOrderViolation => {
                EngineError::CallOrderInvalid("wait/release without acquire")
            }
            BridgeError::KeyedMutexTimeout => EngineError::PeerTerminated,
        }
    }
}

impl From<StateMachineError> for EngineError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::SessionLost => EngineError::SessionLost,
            StateMachineError::InvalidCommand(cmd) => {
                EngineError::CallOrderInvalid(cmd)
            }
        }
    }
}

impl From<NegotiationError> for EngineError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::VersionMismatch { .. } => {
                EngineError::PermissionDenied("layer version mismatch")
            }
            NegotiationError::HandshakeTimedOut => EngineError::PeerTerminated,
            NegotiationError::SetupFailed(_) => EngineError::PeerTerminated,
        }
    }
}

impl From<crate::composition::CompositionError> for EngineError {
    fn from(err: crate::composition::CompositionError) -> Self {
        match err {
            crate::composition::CompositionError::LayerLimitExceeded { submitted, allowed } => {
                EngineError::LayerLimitExceeded { submitted, allowed }
            }
        }
    }
}
