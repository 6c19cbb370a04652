use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use {once_cell::sync::Lazy, tracing::{debug, warn}};

use crate::{
    backend::{AcpRuntime, HealthProbe},
    error::{AcpError, AcpErrorCode, AcpResult},
};

/// A registered backend: the runtime plus an optional health probe.
///
/// A backend with no probe is treated as always healthy.
#[derive(Clone)]
pub struct RuntimeBackendEntry {
    pub id: String,
    pub runtime: Arc<dyn AcpRuntime>,
    pub healthy: Option<HealthProbe>,
}

impl RuntimeBackendEntry {
    #[must_use]
    pub fn new(id: impl Into<String>, runtime: Arc<dyn AcpRuntime>) -> Self {
        Self {
            id: id.into(),
            runtime,
            healthy: None,
        }
    }

    #[must_use]
    pub fn with_health(mut self, probe: HealthProbe) -> Self {
        self.healthy = Some(probe);
        self
    }

    fn is_healthy(&self) -> bool {
        self.healthy.as_ref().is_none_or(|probe| probe())
    }
}

impl fmt::Debug for RuntimeBackendEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBackendEntry")
            .field("id", &self.id)
            .field("has_probe", &self.healthy.is_some())
            .finish()
    }
}

/// Ordered registry of runtime backends.
///
/// Entries keep registration order; selection with no explicit id scans that
/// order. Writers are rare (service start/stop), readers frequent; the mutex
/// only protects against torn reads under multi-threaded hosting.
pub struct BackendRegistry {
    entries: Mutex<Vec<RuntimeBackendEntry>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<RuntimeBackendEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store or replace the entry for `entry.id` (last writer wins).
    ///
    /// Replacing keeps the original registration slot so selection order
    /// stays stable across hot-swaps.
    pub fn register(&self, entry: RuntimeBackendEntry) {
        if entry.id.is_empty() {
            warn!("ignoring backend registration with empty id");
            return;
        }
        let mut entries = self.entries();
        if let Some(slot) = entries.iter_mut().find(|e| e.id == entry.id) {
            debug!(id = %entry.id, "replacing runtime backend");
            *slot = entry;
        } else {
            debug!(id = %entry.id, "registering runtime backend");
            entries.push(entry);
        }
    }

    /// Remove the entry for `id`. No-op when absent.
    pub fn unregister(&self, id: &str) {
        self.entries().retain(|e| e.id != id);
    }

    /// Resolve a backend.
    ///
    /// With an id: that exact entry or `None`. Without: the first entry in
    /// registration order whose probe passes; if none pass, the first
    /// registered entry as a degraded fallback; `None` when empty.
    #[must_use]
    pub fn get(&self, id: Option<&str>) -> Option<RuntimeBackendEntry> {
        let entries = self.entries();
        match id {
            Some(id) => entries.iter().find(|e| e.id == id).cloned(),
            None => entries
                .iter()
                .find(|e| e.is_healthy())
                .or_else(|| entries.first())
                .cloned(),
        }
    }

    /// Like [`get`](Self::get) but enforces strict health: a missing backend
    /// fails with `backend-missing`, an unhealthy one with
    /// `backend-unavailable` (even where `get` would have fallen back).
    pub fn require(&self, id: Option<&str>) -> AcpResult<RuntimeBackendEntry> {
        let entry = self.get(id).ok_or_else(|| match id {
            Some(id) => AcpError::new(
                AcpErrorCode::BackendMissing,
                format!("no runtime backend registered as '{id}'"),
            ),
            None => AcpError::new(
                AcpErrorCode::BackendMissing,
                "no runtime backend registered",
            ),
        })?;
        if !entry.is_healthy() {
            return Err(AcpError::new(
                AcpErrorCode::BackendUnavailable,
                format!("runtime backend '{}' is not healthy", entry.id),
            ));
        }
        Ok(entry)
    }

    /// Registered backend ids in registration order.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.id.clone()).collect()
    }

    /// Drop every entry. Reset-for-testing semantics; also used on full
    /// gateway restarts.
    pub fn reset(&self) {
        self.entries().clear();
    }
}

static GLOBAL: Lazy<BackendRegistry> = Lazy::new(BackendRegistry::new);

/// Process-wide registry.
///
/// Backend registration and session-key resolution can happen from
/// independently loaded integration points, so they must share one store.
#[must_use]
pub fn global() -> &'static BackendRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use {
        super::*,
        crate::backend::{EnsureSessionInput, RuntimeSessionHandle, TurnReceiver, TurnRequest},
    };

    struct StubRuntime {
        id: &'static str,
    }

    #[async_trait]
    impl AcpRuntime for StubRuntime {
        async fn ensure_session(
            &self,
            input: EnsureSessionInput,
        ) -> AcpResult<RuntimeSessionHandle> {
            Ok(RuntimeSessionHandle {
                session_key: input.session_key,
                backend_id: self.id.to_string(),
                runtime_session_name: format!("{}-session", self.id),
            })
        }

        async fn run_turn(&self, _request: TurnRequest) -> AcpResult<TurnReceiver> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }

        async fn cancel(&self, _session_key: &str) -> AcpResult<()> {
            Ok(())
        }

        async fn close(&self, _handle: &RuntimeSessionHandle, _reason: &str) -> AcpResult<()> {
            Ok(())
        }
    }

    fn entry(id: &'static str) -> RuntimeBackendEntry {
        RuntimeBackendEntry::new(id, Arc::new(StubRuntime { id }))
    }

    fn entry_with_flag(id: &'static str, flag: Arc<AtomicBool>) -> RuntimeBackendEntry {
        entry(id).with_health(Arc::new(move || flag.load(Ordering::SeqCst)))
    }

    #[test]
    fn register_then_get_returns_entry() {
        let registry = BackendRegistry::new();
        registry.register(entry("acpx"));
        assert_eq!(registry.get(Some("acpx")).unwrap().id, "acpx");
    }

    #[test]
    fn reregister_replaces_and_keeps_slot() {
        let registry = BackendRegistry::new();
        registry.register(entry("a"));
        registry.register(entry("b"));
        registry.register(entry("a"));
        assert_eq!(registry.list_ids(), vec!["a", "b"]);
    }

    #[test]
    fn unregister_then_get_returns_none() {
        let registry = BackendRegistry::new();
        registry.register(entry("acpx"));
        registry.unregister("acpx");
        assert!(registry.get(Some("acpx")).is_none());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = BackendRegistry::new();
        registry.unregister("never-registered");
        assert!(registry.list_ids().is_empty());
    }

    #[test]
    fn empty_id_registration_is_ignored() {
        let registry = BackendRegistry::new();
        registry.register(RuntimeBackendEntry::new(
            "",
            Arc::new(StubRuntime { id: "" }),
        ));
        assert!(registry.list_ids().is_empty());
    }

    #[test]
    fn selection_prefers_first_healthy() {
        let registry = BackendRegistry::new();
        let down = Arc::new(AtomicBool::new(false));
        registry.register(entry_with_flag("down", down.clone()));
        registry.register(entry("up"));
        assert_eq!(registry.get(None).unwrap().id, "up");

        // Health can change after registration; selection follows it.
        down.store(true, Ordering::SeqCst);
        assert_eq!(registry.get(None).unwrap().id, "down");
    }

    #[test]
    fn selection_falls_back_to_first_when_none_healthy() {
        let registry = BackendRegistry::new();
        registry.register(entry_with_flag("a", Arc::new(AtomicBool::new(false))));
        registry.register(entry_with_flag("b", Arc::new(AtomicBool::new(false))));
        assert_eq!(registry.get(None).unwrap().id, "a");
    }

    #[test]
    fn get_on_empty_registry_returns_none() {
        let registry = BackendRegistry::new();
        assert!(registry.get(None).is_none());
    }

    #[test]
    fn require_with_no_backends_is_backend_missing() {
        let registry = BackendRegistry::new();
        let err = registry.require(None).unwrap_err();
        assert_eq!(err.code, AcpErrorCode::BackendMissing);
    }

    #[test]
    fn require_unhealthy_is_backend_unavailable() {
        let registry = BackendRegistry::new();
        registry.register(entry_with_flag("acpx", Arc::new(AtomicBool::new(false))));
        let err = registry.require(Some("acpx")).unwrap_err();
        assert_eq!(err.code, AcpErrorCode::BackendUnavailable);

        // Strict even on the no-id path, where get() falls back.
        let err = registry.require(None).unwrap_err();
        assert_eq!(err.code, AcpErrorCode::BackendUnavailable);
    }

    #[test]
    fn require_without_probe_is_healthy() {
        let registry = BackendRegistry::new();
        registry.register(entry("acpx"));
        assert_eq!(registry.require(None).unwrap().id, "acpx");
    }

    #[test]
    fn reset_clears_all_entries() {
        let registry = BackendRegistry::new();
        registry.register(entry("a"));
        registry.register(entry("b"));
        registry.reset();
        assert!(registry.get(None).is_none());
    }
}
