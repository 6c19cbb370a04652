use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use crate::error::{AcpError, AcpErrorCode, AcpResult};

/// Input for [`AcpRuntime::ensure_session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureSessionInput {
    pub session_key: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Backend-specific options, passed through opaquely.
    #[serde(default)]
    pub runtime_options: serde_json::Value,
}

/// Handle to a live runtime session on a specific backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSessionHandle {
    pub session_key: String,
    pub backend_id: String,
    pub runtime_session_name: String,
}

/// One exchange against an existing session.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_key: String,
    pub message: String,
    pub timeout_ms: Option<u64>,
}

/// Event emitted while a turn is running.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A chunk of model output to append.
    Delta(String),
    /// Turn completed.
    Done,
    /// Turn failed mid-stream.
    Error(String),
}

/// Receiver end of a turn event stream.
pub type TurnReceiver = mpsc::Receiver<TurnEvent>;

/// Capability set every runtime backend implements.
///
/// Backends differ in how they host agent sessions (in-process subagents,
/// external ACP servers, ...) but expose the same four controls.
#[async_trait]
pub trait AcpRuntime: Send + Sync {
    /// Create the session if it does not exist yet and return its handle.
    async fn ensure_session(&self, input: EnsureSessionInput) -> AcpResult<RuntimeSessionHandle>;

    /// Start a turn; events arrive lazily on the returned receiver.
    async fn run_turn(&self, request: TurnRequest) -> AcpResult<TurnReceiver>;

    /// Cancel the in-flight turn of a session, if any. Not every backend
    /// supports this control; the default reports it as unsupported.
    async fn cancel(&self, session_key: &str) -> AcpResult<()> {
        Err(AcpError::new(
            AcpErrorCode::UnsupportedControl,
            format!("backend cannot cancel the turn for '{session_key}'"),
        ))
    }

    /// Close a session, releasing backend resources.
    async fn close(&self, handle: &RuntimeSessionHandle, reason: &str) -> AcpResult<()>;
}

/// Optional health capability, kept separate from [`AcpRuntime`] since some
/// backends are always available and register no probe.
pub type HealthProbe = Arc<dyn Fn() -> bool + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    struct MinimalRuntime;

    #[async_trait]
    impl AcpRuntime for MinimalRuntime {
        async fn ensure_session(
            &self,
            input: EnsureSessionInput,
        ) -> AcpResult<RuntimeSessionHandle> {
            Ok(RuntimeSessionHandle {
                session_key: input.session_key,
                backend_id: "minimal".into(),
                runtime_session_name: "minimal-0".into(),
            })
        }

        async fn run_turn(&self, _request: TurnRequest) -> AcpResult<TurnReceiver> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn close(&self, _handle: &RuntimeSessionHandle, _reason: &str) -> AcpResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancel_defaults_to_unsupported_control() {
        let err = MinimalRuntime.cancel("s1").await.unwrap_err();
        assert_eq!(err.code, AcpErrorCode::UnsupportedControl);
    }
}
