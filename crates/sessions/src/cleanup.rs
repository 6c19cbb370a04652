//! Best-effort teardown of a partially created session.
//!
//! When a spawn fails after some side effects already happened (runtime
//! handle opened, session manager entry created, binding written), this
//! saga unwinds them in a fixed order. Each step is wrapped individually:
//! a failing step is logged and recorded, and never stops later steps.
//! This is deliberately not a transaction; the goal is maximal cleanup.

use std::{sync::Arc, time::Duration};

use {
    tokio::time::timeout,
    tracing::{info, warn},
};

use {
    pylon_bindings::SessionBindingService,
    pylon_runtime::backend::{AcpRuntime, RuntimeSessionHandle},
};

use crate::{
    manager::{CloseSessionParams, SessionManager},
    rpc::{GatewayRpc, sessions_delete_params},
};

/// Reason attached to every teardown step.
const SPAWN_FAILED_REASON: &str = "spawn-failed";

/// Bound on the final delete-session RPC.
const DELETE_SESSION_TIMEOUT_MS: u64 = 10_000;

/// Collaborators the saga unwinds through.
#[derive(Clone)]
pub struct CleanupDeps {
    pub session_manager: Arc<dyn SessionManager>,
    pub session_bindings: Arc<dyn SessionBindingService>,
    pub rpc: Arc<dyn GatewayRpc>,
}

pub struct CleanupFailedSpawnParams {
    pub session_key: String,
    /// Delete the session record itself, not only its bindings.
    pub should_delete_session: bool,
    pub delete_transcript: bool,
    /// Runtime handle opened before the spawn failed, if any.
    pub runtime_close: Option<(Arc<dyn AcpRuntime>, RuntimeSessionHandle)>,
}

/// Outcome of one teardown step. Diagnostics only, never persisted.
#[derive(Debug, Clone)]
pub struct CleanupStepOutcome {
    pub step: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

fn record(
    outcomes: &mut Vec<CleanupStepOutcome>,
    session_key: &str,
    step: &'static str,
    result: Result<(), String>,
) {
    match result {
        Ok(()) => outcomes.push(CleanupStepOutcome {
            step,
            ok: true,
            error: None,
        }),
        Err(error) => {
            warn!(session_key, step, %error, "spawn cleanup step failed");
            outcomes.push(CleanupStepOutcome {
                step,
                ok: false,
                error: Some(error),
            });
        },
    }
}

/// Unwind a failed ACP session spawn.
///
/// Never fails and never propagates: every internal failure becomes a log
/// entry plus a recorded outcome. Once triggered, all steps run to
/// completion.
pub async fn cleanup_failed_acp_spawn(
    deps: &CleanupDeps,
    params: CleanupFailedSpawnParams,
) -> Vec<CleanupStepOutcome> {
    let session_key = params.session_key.as_str();
    let mut outcomes = Vec::new();

    // 1. Close the runtime handle, when one was opened.
    if let Some((runtime, handle)) = params.runtime_close.as_ref() {
        let result = runtime
            .close(handle, SPAWN_FAILED_REASON)
            .await
            .map_err(|e| e.to_string());
        record(&mut outcomes, session_key, "runtime-close", result);
    }

    // 2. Close the session by key, tolerating a backend that is already
    //    gone and the absence of a backing runtime session.
    let result = deps
        .session_manager
        .close_session(CloseSessionParams {
            session_key: session_key.to_string(),
            reason: SPAWN_FAILED_REASON.to_string(),
            allow_backend_unavailable: true,
            require_acp_session: false,
        })
        .await
        .map_err(|e| e.to_string());
    record(&mut outcomes, session_key, "session-close", result);

    // 3. Drop conversation bindings pointing at the key.
    let result = deps
        .session_bindings
        .unbind_by_session_key(session_key, SPAWN_FAILED_REASON)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string());
    record(&mut outcomes, session_key, "binding-unbind", result);

    // 4. Delete the session record itself, only when asked. Lifecycle hooks
    //    stay suppressed and failure is swallowed entirely.
    if params.should_delete_session {
        let call = deps.rpc.call(
            "sessions.delete",
            sessions_delete_params(session_key, params.delete_transcript, false),
            DELETE_SESSION_TIMEOUT_MS,
        );
        let result = match timeout(Duration::from_millis(DELETE_SESSION_TIMEOUT_MS), call).await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "sessions.delete timed out after {DELETE_SESSION_TIMEOUT_MS}ms"
            )),
        };
        record(&mut outcomes, session_key, "delete-session", result);
    }

    info!(
        session_key,
        steps = outcomes.len(),
        failed = outcomes.iter().filter(|o| !o.ok).count(),
        "spawn cleanup finished"
    );
    outcomes
}
