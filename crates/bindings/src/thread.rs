//! Per-account thread binding manager.
//!
//! Owns the `thread_id -> binding` map for one external account, persists it
//! on every mutation, and evicts expired bindings on a periodic sweep. All
//! mutations (bind, touch, unbind, sweep) serialize on one lock, so the
//! sweep always observes a consistent snapshot and persisted order matches
//! mutation order.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    pylon_common::types::TargetKind,
    tokio::{
        sync::{Mutex, MutexGuard},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{store, surface::ThreadSurface};

/// Default idle timeout: 24 hours.
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// How often the sweep pass runs.
const SWEEP_INTERVAL_MS: u64 = 120_000;

const DEFAULT_FAREWELL: &str = "This thread is no longer bound to a session.";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One live thread→session binding.
///
/// `thread_id` is unique within the account; any number of threads may
/// point at the same `target_session_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBindingRecord {
    pub account_id: String,
    pub channel_id: String,
    pub thread_id: String,
    pub target_kind: TargetKind,
    pub target_session_key: String,
    pub agent_id: String,
    pub label: Option<String>,
    pub bound_by: String,
    pub bound_at: u64,
    pub last_activity_at: u64,
    /// Per-binding override; falls back to the manager's configured value.
    pub idle_timeout_ms: Option<u64>,
    pub max_age_ms: Option<u64>,
}

/// Expiry configuration for one account's manager. Zero disables a limit.
#[derive(Debug, Clone)]
pub struct ThreadBindingConfig {
    pub idle_timeout_ms: u64,
    pub max_age_ms: u64,
}

impl Default for ThreadBindingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_age_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindTargetParams {
    pub channel_id: String,
    /// Existing thread to bind. When `None`, a thread is created on the
    /// surface first, named after `create_thread_name`, the label, or the
    /// session key.
    pub thread_id: Option<String>,
    pub create_thread_name: Option<String>,
    pub target_kind: TargetKind,
    pub target_session_key: String,
    pub agent_id: String,
    pub label: Option<String>,
    pub bound_by: String,
    pub intro_message: Option<String>,
    pub idle_timeout_ms: Option<u64>,
    pub max_age_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TouchParams {
    pub thread_id: String,
    /// Activity timestamp; defaults to now.
    pub at: Option<u64>,
    /// Callers batching many touches may skip the per-touch persist.
    pub persist: bool,
}

#[derive(Debug, Clone)]
pub struct UnbindParams {
    pub thread_id: String,
    pub reason: String,
    pub send_farewell: bool,
    pub farewell_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnbindBySessionKeyParams {
    pub target_session_key: String,
    pub target_kind: Option<TargetKind>,
    pub reason: String,
    pub send_farewell: bool,
    pub farewell_text: Option<String>,
}

/// Per-account thread binding manager.
pub struct ThreadBindingManager {
    account_id: String,
    path: PathBuf,
    surface: Arc<dyn ThreadSurface>,
    config: ThreadBindingConfig,
    bindings: Mutex<HashMap<String, ThreadBindingRecord>>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadBindingManager {
    /// Load any persisted binding set for this account and build the manager.
    /// Call [`start`](Self::start) to begin the sweep loop.
    #[must_use]
    pub fn load(
        account_id: impl Into<String>,
        path: PathBuf,
        surface: Arc<dyn ThreadSurface>,
        config: ThreadBindingConfig,
    ) -> Arc<Self> {
        let account_id = account_id.into();
        let loaded = store::load(&path);
        if !loaded.is_empty() {
            info!(%account_id, count = loaded.len(), "loaded thread bindings");
        }
        Arc::new(Self {
            account_id,
            path,
            surface,
            config,
            bindings: Mutex::new(loaded),
            sweep_handle: Mutex::new(None),
        })
    }

    /// Start the periodic sweep loop. Replaces any previous loop.
    pub async fn start(self: &Arc<Self>) {
        let mgr = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));
            // The first tick fires immediately; skip it so a fresh manager
            // does not sweep before callers finish wiring up.
            interval.tick().await;
            loop {
                interval.tick().await;
                mgr.sweep(now_ms()).await;
            }
        });
        if let Some(old) = self.sweep_handle.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the sweep loop. The manager stays queryable but performs no
    /// further eviction.
    pub async fn stop(&self) {
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
            info!(account_id = %self.account_id, "thread binding sweep stopped");
        }
    }

    /// Create or replace the binding for a thread.
    ///
    /// Returns `None` (with a warning) when thread creation on the surface
    /// fails; no binding is recorded in that case.
    pub async fn bind_target(&self, params: BindTargetParams) -> Option<ThreadBindingRecord> {
        let thread_id = match params.thread_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let name = params
                    .create_thread_name
                    .clone()
                    .or_else(|| params.label.clone())
                    .unwrap_or_else(|| params.target_session_key.clone());
                match self.surface.create_thread(&params.channel_id, &name).await {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(
                            account_id = %self.account_id,
                            channel_id = %params.channel_id,
                            %err,
                            "thread creation failed; nothing bound"
                        );
                        return None;
                    },
                }
            },
        };

        let now = now_ms();
        let record = ThreadBindingRecord {
            account_id: self.account_id.clone(),
            channel_id: params.channel_id.clone(),
            thread_id: thread_id.clone(),
            target_kind: params.target_kind,
            target_session_key: params.target_session_key,
            agent_id: params.agent_id,
            label: params.label,
            bound_by: params.bound_by,
            bound_at: now,
            last_activity_at: now,
            idle_timeout_ms: params.idle_timeout_ms,
            max_age_ms: params.max_age_ms,
        };

        {
            let mut bindings = self.bindings.lock().await;
            bindings.insert(thread_id.clone(), record.clone());
            self.persist(&bindings);
        }

        if let Some(text) = params.intro_message.as_deref() {
            if let Err(err) = self
                .surface
                .send_message(&params.channel_id, &thread_id, text)
                .await
            {
                warn!(account_id = %self.account_id, %thread_id, %err, "intro message failed");
            }
        }

        info!(
            account_id = %self.account_id,
            %thread_id,
            session_key = %record.target_session_key,
            "thread bound"
        );
        Some(record)
    }

    /// Bump `last_activity_at` for an existing binding.
    pub async fn touch_thread(&self, params: TouchParams) -> Option<ThreadBindingRecord> {
        let mut bindings = self.bindings.lock().await;
        let record = bindings.get_mut(&params.thread_id)?;
        record.last_activity_at = params.at.unwrap_or_else(now_ms);
        let snapshot = record.clone();
        if params.persist {
            self.persist(&bindings);
        }
        Some(snapshot)
    }

    /// Remove the binding for a thread; returns the removed record.
    pub async fn unbind_thread(&self, params: UnbindParams) -> Option<ThreadBindingRecord> {
        let removed = {
            let mut bindings = self.bindings.lock().await;
            let removed = bindings.remove(&params.thread_id)?;
            self.persist(&bindings);
            removed
        };
        if params.send_farewell {
            self.send_farewell(&removed, params.farewell_text.as_deref())
                .await;
        }
        info!(
            account_id = %self.account_id,
            thread_id = %removed.thread_id,
            reason = %params.reason,
            "thread unbound"
        );
        Some(removed)
    }

    /// Remove every binding pointing at a session, optionally filtered by
    /// kind. The primary cleanup hook when a session is destroyed.
    pub async fn unbind_by_session_key(
        &self,
        params: UnbindBySessionKeyParams,
    ) -> Vec<ThreadBindingRecord> {
        let removed = {
            let mut bindings = self.bindings.lock().await;
            let thread_ids: Vec<String> = bindings
                .values()
                .filter(|r| {
                    r.target_session_key == params.target_session_key
                        && params.target_kind.is_none_or(|k| r.target_kind == k)
                })
                .map(|r| r.thread_id.clone())
                .collect();
            if thread_ids.is_empty() {
                return Vec::new();
            }
            let removed: Vec<ThreadBindingRecord> = thread_ids
                .iter()
                .filter_map(|id| bindings.remove(id))
                .collect();
            self.persist(&bindings);
            removed
        };
        if params.send_farewell {
            for record in &removed {
                self.send_farewell(record, params.farewell_text.as_deref())
                    .await;
            }
        }
        info!(
            account_id = %self.account_id,
            session_key = %params.target_session_key,
            count = removed.len(),
            reason = %params.reason,
            "threads unbound by session key"
        );
        removed
    }

    pub async fn get_by_thread_id(&self, thread_id: &str) -> Option<ThreadBindingRecord> {
        self.bindings.lock().await.get(thread_id).cloned()
    }

    /// The earliest-bound record pointing at the session, if any.
    pub async fn get_by_session_key(&self, session_key: &str) -> Option<ThreadBindingRecord> {
        self.bindings
            .lock()
            .await
            .values()
            .filter(|r| r.target_session_key == session_key)
            .min_by_key(|r| r.bound_at)
            .cloned()
    }

    pub async fn list_by_session_key(&self, session_key: &str) -> Vec<ThreadBindingRecord> {
        let mut records: Vec<ThreadBindingRecord> = self
            .bindings
            .lock()
            .await
            .values()
            .filter(|r| r.target_session_key == session_key)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.bound_at);
        records
    }

    pub async fn list_bindings(&self) -> Vec<ThreadBindingRecord> {
        let mut records: Vec<ThreadBindingRecord> =
            self.bindings.lock().await.values().cloned().collect();
        records.sort_by_key(|r| r.bound_at);
        records
    }

    #[must_use]
    pub fn get_idle_timeout_ms(&self) -> u64 {
        self.config.idle_timeout_ms
    }

    #[must_use]
    pub fn get_max_age_ms(&self) -> u64 {
        self.config.max_age_ms
    }

    /// One eviction pass: remove every expired binding, persist once.
    /// Expired bindings get no farewell.
    async fn sweep(&self, now: u64) -> Vec<ThreadBindingRecord> {
        let expired = {
            let mut bindings = self.bindings.lock().await;
            let expired_ids: Vec<String> = bindings
                .values()
                .filter(|r| self.is_expired(r, now))
                .map(|r| r.thread_id.clone())
                .collect();
            if expired_ids.is_empty() {
                return Vec::new();
            }
            let expired: Vec<ThreadBindingRecord> = expired_ids
                .iter()
                .filter_map(|id| bindings.remove(id))
                .collect();
            self.persist(&bindings);
            expired
        };
        for record in &expired {
            debug!(
                account_id = %self.account_id,
                thread_id = %record.thread_id,
                session_key = %record.target_session_key,
                "thread binding expired"
            );
        }
        info!(
            account_id = %self.account_id,
            count = expired.len(),
            "swept expired thread bindings"
        );
        expired
    }

    fn is_expired(&self, record: &ThreadBindingRecord, now: u64) -> bool {
        let idle = record.idle_timeout_ms.unwrap_or(self.config.idle_timeout_ms);
        if idle > 0 && now.saturating_sub(record.last_activity_at) > idle {
            return true;
        }
        let max_age = record.max_age_ms.unwrap_or(self.config.max_age_ms);
        max_age > 0 && now.saturating_sub(record.bound_at) > max_age
    }

    async fn send_farewell(&self, record: &ThreadBindingRecord, text: Option<&str>) {
        let text = text.unwrap_or(DEFAULT_FAREWELL);
        if let Err(err) = self
            .surface
            .send_message(&record.channel_id, &record.thread_id, text)
            .await
        {
            warn!(
                account_id = %self.account_id,
                thread_id = %record.thread_id,
                %err,
                "farewell message failed"
            );
        }
    }

    /// Persist under the caller's lock so writes land in mutation order.
    /// A persistence failure is logged, never fatal for routing.
    fn persist(&self, bindings: &MutexGuard<'_, HashMap<String, ThreadBindingRecord>>) {
        if let Err(err) = store::save(&self.path, bindings) {
            warn!(
                account_id = %self.account_id,
                path = %self.path.display(),
                %err,
                "failed to persist thread bindings"
            );
        }
    }
}
