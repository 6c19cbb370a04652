//! Versioned JSON persistence for an account's thread binding set.
//!
//! The file is owned exclusively by its [`ThreadBindingManager`] instance;
//! nothing else writes it. Loading is lenient: an unreadable file yields an
//! empty set with a warning rather than blocking startup.
//!
//! [`ThreadBindingManager`]: crate::thread::ThreadBindingManager

use std::{collections::HashMap, fs, path::Path};

use {
    pylon_common::types::TargetKind,
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::{
    error::{Context, Result},
    thread::ThreadBindingRecord,
};

const BINDING_FILE_VERSION: u32 = 1;

fn binding_file_version() -> u32 {
    BINDING_FILE_VERSION
}

/// Persisted form of a thread binding.
///
/// Field names are camelCase on disk; the deprecated absolute `expiresAt`
/// is still accepted so files written by old gateways keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedThreadBinding {
    pub account_id: String,
    pub channel_id: String,
    pub thread_id: String,
    pub target_kind: TargetKind,
    pub target_session_key: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub bound_by: String,
    pub bound_at: u64,
    pub last_activity_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_ms: Option<u64>,
    /// Deprecated: absolute expiry, superseded by the idle/max-age pair.
    /// Migrated on load, dropped on the next save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BindingFile {
    #[serde(default = "binding_file_version")]
    version: u32,
    #[serde(default)]
    bindings: HashMap<String, PersistedThreadBinding>,
}

impl Default for BindingFile {
    fn default() -> Self {
        Self {
            version: BINDING_FILE_VERSION,
            bindings: HashMap::new(),
        }
    }
}

impl From<PersistedThreadBinding> for ThreadBindingRecord {
    fn from(p: PersistedThreadBinding) -> Self {
        // Legacy absolute expiry becomes a max-age relative to bound_at.
        // An already-expired legacy binding gets collected by the first
        // sweep rather than at load.
        let max_age_ms = p.max_age_ms.or_else(|| {
            p.expires_at
                .map(|at| at.saturating_sub(p.bound_at))
                .filter(|ms| *ms > 0)
        });
        Self {
            account_id: p.account_id,
            channel_id: p.channel_id,
            thread_id: p.thread_id,
            target_kind: p.target_kind,
            target_session_key: p.target_session_key,
            agent_id: p.agent_id,
            label: p.label,
            bound_by: p.bound_by,
            bound_at: p.bound_at,
            last_activity_at: p.last_activity_at,
            idle_timeout_ms: p.idle_timeout_ms,
            max_age_ms,
        }
    }
}

impl From<&ThreadBindingRecord> for PersistedThreadBinding {
    fn from(r: &ThreadBindingRecord) -> Self {
        Self {
            account_id: r.account_id.clone(),
            channel_id: r.channel_id.clone(),
            thread_id: r.thread_id.clone(),
            target_kind: r.target_kind,
            target_session_key: r.target_session_key.clone(),
            agent_id: r.agent_id.clone(),
            label: r.label.clone(),
            bound_by: r.bound_by.clone(),
            bound_at: r.bound_at,
            last_activity_at: r.last_activity_at,
            idle_timeout_ms: r.idle_timeout_ms,
            max_age_ms: r.max_age_ms,
            expires_at: None,
        }
    }
}

/// Load a binding set from disk, or an empty one.
pub fn load(path: &Path) -> HashMap<String, ThreadBindingRecord> {
    if !path.exists() {
        return HashMap::new();
    }
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) => {
            warn!(path = %path.display(), %err, "could not read binding file; starting empty");
            return HashMap::new();
        },
    };
    let file: BindingFile = match serde_json::from_str(&data) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), %err, "malformed binding file; starting empty");
            return HashMap::new();
        },
    };
    if file.version != BINDING_FILE_VERSION {
        warn!(
            path = %path.display(),
            version = file.version,
            "unknown binding file version; loading anyway"
        );
    }
    file.bindings
        .into_iter()
        .map(|(thread_id, persisted)| (thread_id, persisted.into()))
        .collect()
}

/// Persist the full binding set as a versioned payload.
pub fn save(path: &Path, bindings: &HashMap<String, ThreadBindingRecord>) -> Result<()> {
    let file = BindingFile {
        version: BINDING_FILE_VERSION,
        bindings: bindings
            .iter()
            .map(|(thread_id, record)| (thread_id.clone(), record.into()))
            .collect(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create binding dir {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(&file).context("encode binding file")?;
    fs::write(path, data).with_context(|| format!("write binding file {}", path.display()))?;
    Ok(())
}
