//! Routing an inbound message to a session and running a turn through the
//! registry-selected backend.
//!
//! Thread bindings take precedence; conversation bindings are the
//! fallback. Any failure surfaced here is a typed [`AcpError`].

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use {
    pylon_bindings::{
        session::{ConversationKey, SessionBindingService},
        thread::{ThreadBindingManager, TouchParams},
    },
    pylon_common::types::{InboundContext, TargetKind},
    pylon_runtime::{
        backend::{EnsureSessionInput, TurnReceiver, TurnRequest},
        error::{AcpError, AcpErrorCode, AcpResult},
        registry::BackendRegistry,
    },
};

use crate::cleanup::{CleanupDeps, CleanupFailedSpawnParams, cleanup_failed_acp_spawn};

fn default_true() -> bool {
    true
}

fn default_agent_id() -> String {
    "main".to_string()
}

/// Dispatch feature configuration for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Agent used for conversation-level routes, which carry no agent of
    /// their own.
    #[serde(default = "default_agent_id")]
    pub default_agent_id: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_agent_id: default_agent_id(),
        }
    }
}

/// Resolved target for an inbound message.
#[derive(Debug, Clone)]
pub struct SessionRoute {
    pub target_kind: TargetKind,
    pub session_key: String,
    pub agent_id: Option<String>,
}

/// Resolve where a message routes: its thread binding when one exists
/// (touching it as activity), otherwise the conversation binding.
pub async fn resolve_session_route(
    threads: &ThreadBindingManager,
    conversations: &dyn SessionBindingService,
    ctx: &InboundContext,
) -> Option<SessionRoute> {
    if let Some(thread_id) = ctx.thread_id.as_deref() {
        if let Some(record) = threads
            .touch_thread(TouchParams {
                thread_id: thread_id.to_string(),
                at: None,
                persist: false,
            })
            .await
        {
            return Some(SessionRoute {
                target_kind: record.target_kind,
                session_key: record.target_session_key,
                agent_id: Some(record.agent_id),
            });
        }
    }
    let key = ConversationKey {
        channel: ctx.channel.clone(),
        account_id: ctx.account_id.clone(),
        conversation_id: ctx.conversation_id.clone(),
    };
    conversations
        .resolve_by_conversation(&key)
        .await
        .map(|binding| SessionRoute {
            target_kind: binding.target_kind,
            session_key: binding.target_session_key,
            agent_id: None,
        })
}

#[derive(Debug, Clone)]
pub struct DispatchTurnParams {
    /// Pin a specific backend; `None` lets the registry pick.
    pub backend_id: Option<String>,
    pub route: SessionRoute,
    pub message: String,
    pub timeout_ms: Option<u64>,
    pub runtime_options: serde_json::Value,
}

/// Run one turn against the routed session.
///
/// When `ensure_session` fails, partial backend state may already exist;
/// the cleanup saga runs before the typed error propagates.
pub async fn dispatch_turn(
    registry: &BackendRegistry,
    config: &DispatchConfig,
    cleanup: &CleanupDeps,
    params: DispatchTurnParams,
) -> AcpResult<TurnReceiver> {
    if !config.enabled {
        return Err(AcpError::new(
            AcpErrorCode::DispatchDisabled,
            "session dispatch is disabled for this account",
        ));
    }
    if params.route.session_key.is_empty() {
        return Err(AcpError::new(
            AcpErrorCode::InvalidRuntimeOption,
            "session key must not be empty",
        ));
    }
    if params.timeout_ms == Some(0) {
        return Err(AcpError::new(
            AcpErrorCode::InvalidRuntimeOption,
            "turn timeout must be greater than zero",
        ));
    }

    let entry = registry.require(params.backend_id.as_deref())?;

    let input = EnsureSessionInput {
        session_key: params.route.session_key.clone(),
        agent_id: params
            .route
            .agent_id
            .clone()
            .unwrap_or_else(|| config.default_agent_id.clone()),
        label: None,
        runtime_options: params.runtime_options,
    };
    let handle = match entry.runtime.ensure_session(input).await {
        Ok(handle) => handle,
        Err(err) => {
            cleanup_failed_acp_spawn(
                cleanup,
                CleanupFailedSpawnParams {
                    session_key: params.route.session_key.clone(),
                    should_delete_session: false,
                    delete_transcript: false,
                    runtime_close: None,
                },
            )
            .await;
            return Err(AcpError::wrap(
                anyhow::Error::new(err),
                AcpErrorCode::SessionInitFailed,
                "session initialization failed",
            ));
        },
    };
    debug!(
        session_key = %handle.session_key,
        backend = %handle.backend_id,
        "session ensured"
    );

    entry
        .runtime
        .run_turn(TurnRequest {
            session_key: handle.session_key,
            message: params.message,
            timeout_ms: params.timeout_ms,
        })
        .await
        .map_err(|err| {
            AcpError::wrap(anyhow::Error::new(err), AcpErrorCode::TurnFailed, "turn failed")
        })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use {
        super::*,
        crate::manager::NoopSessionManager,
        pylon_bindings::{
            FileSessionBindingService, SessionBinding, ThreadBindingConfig,
            surface::NoopThreadSurface,
            thread::BindTargetParams,
        },
        pylon_runtime::{
            backend::{AcpRuntime, RuntimeSessionHandle, TurnEvent},
            registry::RuntimeBackendEntry,
        },
        serde_json::Value,
    };

    struct ScriptedRuntime {
        fail_ensure: bool,
        fail_turn: bool,
    }

    #[async_trait]
    impl AcpRuntime for ScriptedRuntime {
        async fn ensure_session(
            &self,
            input: EnsureSessionInput,
        ) -> AcpResult<RuntimeSessionHandle> {
            if self.fail_ensure {
                return Err(AcpError::new(
                    AcpErrorCode::SessionInitFailed,
                    "bootstrap crashed",
                ));
            }
            Ok(RuntimeSessionHandle {
                session_key: input.session_key,
                backend_id: "acpx".into(),
                runtime_session_name: "acpx-0".into(),
            })
        }

        async fn run_turn(&self, _request: TurnRequest) -> AcpResult<TurnReceiver> {
            if self.fail_turn {
                return Err(AcpError::new(AcpErrorCode::TurnFailed, "stream reset"));
            }
            let (tx, rx) = tokio::sync::mpsc::channel(4);
            tx.send(TurnEvent::Delta("hi".into())).await.ok();
            tx.send(TurnEvent::Done).await.ok();
            Ok(rx)
        }

        async fn cancel(&self, _session_key: &str) -> AcpResult<()> {
            Ok(())
        }

        async fn close(&self, _handle: &RuntimeSessionHandle, _reason: &str) -> AcpResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingRpc {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::rpc::GatewayRpc for CountingRpc {
        async fn call(
            &self,
            _method: &str,
            _params: Value,
            _timeout_ms: u64,
        ) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn registry_with(runtime: ScriptedRuntime) -> BackendRegistry {
        let registry = BackendRegistry::new();
        registry.register(RuntimeBackendEntry::new("acpx", Arc::new(runtime)));
        registry
    }

    fn deps() -> (CleanupDeps, Arc<FileSessionBindingService>) {
        let bindings = Arc::new(FileSessionBindingService::in_memory());
        (
            CleanupDeps {
                session_manager: Arc::new(NoopSessionManager),
                session_bindings: bindings.clone(),
                rpc: Arc::new(CountingRpc::default()),
            },
            bindings,
        )
    }

    fn route(session_key: &str) -> SessionRoute {
        SessionRoute {
            target_kind: TargetKind::Acp,
            session_key: session_key.into(),
            agent_id: None,
        }
    }

    fn turn_params(session_key: &str) -> DispatchTurnParams {
        DispatchTurnParams {
            backend_id: None,
            route: route(session_key),
            message: "hello".into(),
            timeout_ms: None,
            runtime_options: Value::Null,
        }
    }

    #[tokio::test]
    async fn happy_path_streams_events() {
        let registry = registry_with(ScriptedRuntime {
            fail_ensure: false,
            fail_turn: false,
        });
        let (cleanup, _) = deps();

        let mut rx = dispatch_turn(
            &registry,
            &DispatchConfig::default(),
            &cleanup,
            turn_params("s1"),
        )
        .await
        .unwrap();
        assert!(matches!(rx.recv().await, Some(TurnEvent::Delta(_))));
        assert!(matches!(rx.recv().await, Some(TurnEvent::Done)));
    }

    #[tokio::test]
    async fn disabled_dispatch_is_typed() {
        let registry = registry_with(ScriptedRuntime {
            fail_ensure: false,
            fail_turn: false,
        });
        let (cleanup, _) = deps();
        let config = DispatchConfig {
            enabled: false,
            ..Default::default()
        };

        let err = dispatch_turn(&registry, &config, &cleanup, turn_params("s1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, AcpErrorCode::DispatchDisabled);
    }

    #[tokio::test]
    async fn empty_session_key_is_invalid_option() {
        let registry = registry_with(ScriptedRuntime {
            fail_ensure: false,
            fail_turn: false,
        });
        let (cleanup, _) = deps();

        let err = dispatch_turn(
            &registry,
            &DispatchConfig::default(),
            &cleanup,
            turn_params(""),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, AcpErrorCode::InvalidRuntimeOption);
    }

    #[tokio::test]
    async fn failed_ensure_runs_cleanup_and_surfaces_init_failure() {
        let registry = registry_with(ScriptedRuntime {
            fail_ensure: true,
            fail_turn: false,
        });
        let (cleanup, bindings) = deps();
        bindings
            .bind(
                ConversationKey {
                    channel: "slack".into(),
                    account_id: "acct".into(),
                    conversation_id: "c1".into(),
                },
                SessionBinding {
                    target_kind: TargetKind::Acp,
                    target_session_key: "s1".into(),
                },
            )
            .await
            .unwrap();

        let err = dispatch_turn(
            &registry,
            &DispatchConfig::default(),
            &cleanup,
            turn_params("s1"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, AcpErrorCode::SessionInitFailed);

        // The saga dropped the conversation binding that pointed at s1.
        let leftover = bindings
            .resolve_by_conversation(&ConversationKey {
                channel: "slack".into(),
                account_id: "acct".into(),
                conversation_id: "c1".into(),
            })
            .await;
        assert!(leftover.is_none());
    }

    #[tokio::test]
    async fn failed_turn_is_typed() {
        let registry = registry_with(ScriptedRuntime {
            fail_ensure: false,
            fail_turn: true,
        });
        let (cleanup, _) = deps();

        let err = dispatch_turn(
            &registry,
            &DispatchConfig::default(),
            &cleanup,
            turn_params("s1"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, AcpErrorCode::TurnFailed);
        assert_eq!(err.message, "stream reset");
    }

    #[tokio::test]
    async fn thread_binding_wins_over_conversation_binding() {
        let dir = tempfile::tempdir().unwrap();
        let threads = ThreadBindingManager::load(
            "acct",
            dir.path().join("bindings.json"),
            Arc::new(NoopThreadSurface),
            ThreadBindingConfig::default(),
        );
        threads
            .bind_target(BindTargetParams {
                channel_id: "chan".into(),
                thread_id: Some("t1".into()),
                create_thread_name: None,
                target_kind: TargetKind::Acp,
                target_session_key: "thread-session".into(),
                agent_id: "triage".into(),
                label: None,
                bound_by: "tester".into(),
                intro_message: None,
                idle_timeout_ms: None,
                max_age_ms: None,
            })
            .await
            .unwrap();

        let conversations = FileSessionBindingService::in_memory();
        conversations
            .bind(
                ConversationKey {
                    channel: "slack".into(),
                    account_id: "acct".into(),
                    conversation_id: "c1".into(),
                },
                SessionBinding {
                    target_kind: TargetKind::Subagent,
                    target_session_key: "conv-session".into(),
                },
            )
            .await
            .unwrap();

        let ctx = InboundContext {
            channel: "slack".into(),
            account_id: "acct".into(),
            conversation_id: "c1".into(),
            thread_id: Some("t1".into()),
        };
        let route = resolve_session_route(&threads, &conversations, &ctx)
            .await
            .unwrap();
        assert_eq!(route.session_key, "thread-session");
        assert_eq!(route.agent_id.as_deref(), Some("triage"));

        // Routing counts as activity on the thread binding.
        let record = threads.get_by_thread_id("t1").await.unwrap();
        assert!(record.last_activity_at >= record.bound_at);

        // Without the thread, the conversation binding answers.
        let ctx = InboundContext {
            thread_id: None,
            ..ctx
        };
        let route = resolve_session_route(&threads, &conversations, &ctx)
            .await
            .unwrap();
        assert_eq!(route.session_key, "conv-session");
        assert!(route.agent_id.is_none());
    }
}
