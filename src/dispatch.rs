//! Dispatch & command router (C4): classifies every operation and, on the
//! main-side worker, hands it to its handler. Shaped after the dispatch
//! thread wiring in the screen-sharing event loop this engine replaces —
//! read discriminator, switch on it, run pre/post logic, write response.

use log::{debug, error};
use thiserror::Error;

use crate::protocol::RequestKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    LocalOnly,
    Passthrough,
    Mediated,
}

#[derive(Error, Debug, Clone, Copy)]
pub enum DispatchError {
    #[error("unrecognized request kind discriminant {0}")]
    UnknownRequestKind(u64),
    #[error("{kind:?} is {actual:?}, expected {expected:?}")]
    WrongClass {
        kind: RequestKind,
        actual: OperationClass,
        expected: OperationClass,
    },
}

/// Every operation belongs to exactly one class (§4.4). Command
/// passthroughs with no overlay-specific bookkeeping beyond simple argument
/// forwarding are out of scope for this engine and are not represented as
/// distinct `RequestKind` variants; everything this router sees is either
/// mediated or requires main-side passthrough execution.
pub fn classify(kind: RequestKind) -> OperationClass {
    use RequestKind::*;
    match kind {
        EnumerateInstanceExtensionProperties | GetInstanceProperties => OperationClass::Passthrough,
        GetSystem | GetSystemProperties | GetD3D11GraphicsRequirements
        | EnumerateViewConfigurations | EnumerateViewConfigurationViews
        | GetViewConfigurationProperties | EnumerateSwapchainFormats | LocateSpace => {
            OperationClass::Passthrough
        }
        Handshake
        | CreateInstance
        | CreateSession
        | DestroySession
        | BeginSession
        | EndSession
        | RequestExitSession
        | CreateReferenceSpace
        | DestroySpace
        | CreateSwapchain
        | DestroySwapchain
        | AcquireSwapchainImage
        | WaitSwapchainImage
        | ReleaseSwapchainImage
        | BeginFrame
        | WaitFrame
        | EndFrame
        | PollEvent => OperationClass::Mediated,
    }
}

/// Main-side worker entry point: logs and classifies a request kind before
/// the caller dispatches to the concrete handler. Returns `Unsupported` for
/// a discriminant the wire format doesn't know (forward-compat guard
/// against a newer overlay build talking to an older main).
pub fn classify_and_log(raw_kind: u64) -> Result<(RequestKind, OperationClass), DispatchError> {
    let Some(kind) = RequestKind::from_u64(raw_kind) else {
        error!("dispatch: unrecognized request kind {raw_kind}");
        return Err(DispatchError::UnknownRequestKind(raw_kind));
    };
    let class = classify(kind);
    debug!("dispatch: {kind:?} classified as {class:?}");
    Ok((kind, class))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_is_mediated() {
        assert_eq!(classify(RequestKind::CreateSession), OperationClass::Mediated);
    }

    #[test]
    fn enumerate_extensions_is_passthrough() {
        assert_eq!(
            classify(RequestKind::EnumerateInstanceExtensionProperties),
            OperationClass::Passthrough
        );
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        assert!(classify_and_log(u64::MAX).is_err());
    }
}
