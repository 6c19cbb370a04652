use {async_trait::async_trait, pylon_runtime::error::AcpResult};

/// Parameters for closing a session through the session manager.
#[derive(Debug, Clone)]
pub struct CloseSessionParams {
    pub session_key: String,
    pub reason: String,
    /// Tolerate the serving backend being gone instead of failing.
    pub allow_backend_unavailable: bool,
    /// Fail when no backing ACP runtime session exists.
    pub require_acp_session: bool,
}

/// Owner of session records and their backing runtime state.
///
/// The gateway provides the live implementation; the control plane only
/// needs close-by-key with tolerance flags.
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn close_session(&self, params: CloseSessionParams) -> AcpResult<()>;
}

/// No-op manager for standalone wiring and tests.
pub struct NoopSessionManager;

#[async_trait]
impl SessionManager for NoopSessionManager {
    async fn close_session(&self, _params: CloseSessionParams) -> AcpResult<()> {
        Ok(())
    }
}
