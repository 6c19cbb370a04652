//! Session lifecycle orchestration: routing inbound messages to sessions,
//! running turns through a registered backend, and unwinding partially
//! created sessions when a spawn fails.

pub mod cleanup;
pub mod dispatch;
pub mod manager;
pub mod rpc;

pub use {
    cleanup::{
        CleanupDeps, CleanupFailedSpawnParams, CleanupStepOutcome, cleanup_failed_acp_spawn,
    },
    dispatch::{DispatchConfig, SessionRoute, dispatch_turn, resolve_session_route},
    manager::{CloseSessionParams, NoopSessionManager, SessionManager},
    rpc::GatewayRpc,
};
