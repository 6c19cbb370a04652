//! Generic gateway RPC surface consumed by the control plane.

use {
    async_trait::async_trait,
    serde_json::{Value, json},
};

/// Generic RPC call into the gateway. Implementations route over whatever
/// transport the host uses; params and results are JSON values with
/// camelCase fields.
#[async_trait]
pub trait GatewayRpc: Send + Sync {
    async fn call(&self, method: &str, params: Value, timeout_ms: u64) -> anyhow::Result<Value>;
}

/// Params for `sessions.delete`.
#[must_use]
pub fn sessions_delete_params(
    key: &str,
    delete_transcript: bool,
    emit_lifecycle_hooks: bool,
) -> Value {
    json!({
        "key": key,
        "deleteTranscript": delete_transcript,
        "emitLifecycleHooks": emit_lifecycle_hooks,
    })
}

/// Selector for `sessions.resolve`; exactly one of key, session id, label.
#[derive(Debug, Clone, Copy)]
pub enum SessionSelector<'a> {
    Key(&'a str),
    SessionId(&'a str),
    Label(&'a str),
}

#[must_use]
pub fn sessions_resolve_params(selector: SessionSelector<'_>) -> Value {
    match selector {
        SessionSelector::Key(key) => json!({ "key": key }),
        SessionSelector::SessionId(id) => json!({ "sessionId": id }),
        SessionSelector::Label(label) => json!({ "label": label }),
    }
}

/// Resolve a session key through `sessions.resolve`.
pub async fn resolve_session_key(
    rpc: &dyn GatewayRpc,
    selector: SessionSelector<'_>,
    timeout_ms: u64,
) -> anyhow::Result<String> {
    let result = rpc
        .call("sessions.resolve", sessions_resolve_params(selector), timeout_ms)
        .await?;
    result
        .get("key")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("sessions.resolve returned no key"))
}
