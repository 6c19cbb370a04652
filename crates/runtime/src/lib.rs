//! Runtime backend control plane: the ACP error taxonomy, the runtime
//! capability trait every backend implements, and the process-wide backend
//! registry that picks which backend serves a request.

pub mod backend;
pub mod error;
pub mod registry;

pub use {
    backend::{
        AcpRuntime, EnsureSessionInput, HealthProbe, RuntimeSessionHandle, TurnEvent,
        TurnReceiver, TurnRequest,
    },
    error::{AcpError, AcpErrorCode, AcpResult, guard},
    registry::{BackendRegistry, RuntimeBackendEntry},
};
