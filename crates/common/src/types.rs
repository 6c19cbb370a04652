use serde::{Deserialize, Serialize};

/// What a binding routes to: a subagent session or a full ACP runtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Subagent,
    Acp,
}

impl TargetKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subagent => "subagent",
            Self::Acp => "acp",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context for one inbound message, as handed over by a platform adapter.
///
/// `conversation_id` identifies the chat/DM/call the message arrived in;
/// `thread_id` is only present on platforms with native threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundContext {
    pub channel: String,
    pub account_id: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}
