//! Conversation-level session bindings.
//!
//! The general-purpose fallback used when no thread-specific binding
//! exists: one binding per `(channel, account, conversation)` tuple, last
//! bind wins, unbind idempotent.

use std::{collections::HashMap, fs, path::PathBuf};

use {
    async_trait::async_trait,
    pylon_common::types::TargetKind,
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::{info, warn},
};

use crate::error::Result;

/// Identity of one external conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    pub channel: String,
    pub account_id: String,
    pub conversation_id: String,
}

/// Where a conversation routes when no thread binding matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBinding {
    pub target_kind: TargetKind,
    pub target_session_key: String,
}

/// Authoritative conversation→session routing, consumed by the control
/// plane and by the spawn-failure cleanup saga.
#[async_trait]
pub trait SessionBindingService: Send + Sync {
    async fn resolve_by_conversation(&self, key: &ConversationKey) -> Option<SessionBinding>;

    /// Bind a conversation; an existing binding for the tuple is replaced.
    async fn bind(&self, key: ConversationKey, binding: SessionBinding) -> Result<()>;

    /// Remove every binding pointing at the session. Idempotent; returns
    /// how many bindings were removed.
    async fn unbind_by_session_key(&self, target_session_key: &str, reason: &str)
    -> Result<usize>;
}

// ── File-backed implementation ──────────────────────────────────────────────

fn session_binding_file_version() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSessionBinding {
    #[serde(flatten)]
    key: ConversationKey,
    #[serde(flatten)]
    binding: SessionBinding,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionBindingFile {
    #[serde(default = "session_binding_file_version")]
    version: u32,
    #[serde(default)]
    bindings: Vec<PersistedSessionBinding>,
}

/// In-memory conversation bindings with optional JSON persistence.
pub struct FileSessionBindingService {
    path: Option<PathBuf>,
    bindings: Mutex<HashMap<ConversationKey, SessionBinding>>,
}

impl FileSessionBindingService {
    /// Purely in-memory service (tests, ephemeral accounts).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Load persisted bindings, or start empty when the file is missing or
    /// unreadable.
    #[must_use]
    pub fn load(path: PathBuf) -> Self {
        let bindings = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<SessionBindingFile>(&data) {
                Ok(file) => file
                    .bindings
                    .into_iter()
                    .map(|p| (p.key, p.binding))
                    .collect(),
                Err(err) => {
                    warn!(path = %path.display(), %err, "malformed session binding file; starting empty");
                    HashMap::new()
                },
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            bindings: Mutex::new(bindings),
        }
    }

    fn persist(&self, bindings: &HashMap<ConversationKey, SessionBinding>) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let file = SessionBindingFile {
            version: session_binding_file_version(),
            bindings: bindings
                .iter()
                .map(|(key, binding)| PersistedSessionBinding {
                    key: key.clone(),
                    binding: binding.clone(),
                })
                .collect(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

#[async_trait]
impl SessionBindingService for FileSessionBindingService {
    async fn resolve_by_conversation(&self, key: &ConversationKey) -> Option<SessionBinding> {
        self.bindings.lock().await.get(key).cloned()
    }

    async fn bind(&self, key: ConversationKey, binding: SessionBinding) -> Result<()> {
        let mut bindings = self.bindings.lock().await;
        info!(
            channel = %key.channel,
            account_id = %key.account_id,
            conversation_id = %key.conversation_id,
            session_key = %binding.target_session_key,
            "conversation bound"
        );
        bindings.insert(key, binding);
        self.persist(&bindings)
    }

    async fn unbind_by_session_key(
        &self,
        target_session_key: &str,
        reason: &str,
    ) -> Result<usize> {
        let mut bindings = self.bindings.lock().await;
        let before = bindings.len();
        bindings.retain(|_, b| b.target_session_key != target_session_key);
        let removed = before - bindings.len();
        if removed > 0 {
            info!(
                session_key = target_session_key,
                count = removed,
                reason,
                "conversations unbound"
            );
            self.persist(&bindings)?;
        }
        Ok(removed)
    }
}
