use std::fmt;

/// Closed set of failure codes for the ACP control plane.
///
/// Every failure that crosses a component boundary above this layer carries
/// one of these codes; untyped failures are wrapped at the boundary via
/// [`AcpError::wrap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcpErrorCode {
    /// No backend is registered at all.
    BackendMissing,
    /// A backend is registered but its health probe reports it down.
    BackendUnavailable,
    /// The backend lacks a requested control (e.g. cancel mid-turn).
    UnsupportedControl,
    /// Session dispatch is switched off in configuration.
    DispatchDisabled,
    /// A caller-supplied runtime option is invalid.
    InvalidRuntimeOption,
    /// The backend accepted the request but session bootstrap failed.
    SessionInitFailed,
    /// An in-progress exchange failed.
    TurnFailed,
}

impl AcpErrorCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackendMissing => "backend-missing",
            Self::BackendUnavailable => "backend-unavailable",
            Self::UnsupportedControl => "unsupported-control",
            Self::DispatchDisabled => "dispatch-disabled",
            Self::InvalidRuntimeOption => "invalid-runtime-option",
            Self::SessionInitFailed => "session-init-failed",
            Self::TurnFailed => "turn-failed",
        }
    }

    /// Actionable next step shown to the caller alongside the error.
    #[must_use]
    pub fn hint(&self) -> &'static str {
        match self {
            Self::BackendMissing => {
                "register a runtime backend (check `backends status`), then retry"
            },
            Self::BackendUnavailable => {
                "run `backends status` to diagnose the backend, then retry"
            },
            Self::UnsupportedControl => {
                "route this request to a backend that supports the control"
            },
            Self::DispatchDisabled => "enable `dispatch.enabled` in the account configuration",
            Self::InvalidRuntimeOption => "fix the runtime option and resend the request",
            Self::SessionInitFailed => "recreate the session and rebind the conversation",
            Self::TurnFailed => "retry the turn; if it keeps failing, recreate the session",
        }
    }
}

impl fmt::Display for AcpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure surfaced across any boundary of the control plane.
#[derive(Debug, thiserror::Error)]
#[error("acp error ({code}): {message}")]
pub struct AcpError {
    pub code: AcpErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type AcpResult<T> = Result<T, AcpError>;

impl AcpError {
    #[must_use]
    pub fn new(code: AcpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_cause(
        code: AcpErrorCode,
        message: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Normalize any failure into a typed ACP error.
    ///
    /// An error that already carries a code passes through unchanged (the
    /// fallback never overwrites it). Anything else is wrapped with the
    /// fallback code, keeping the original message when it has one and
    /// chaining the original as cause.
    #[must_use]
    pub fn wrap(err: anyhow::Error, fallback_code: AcpErrorCode, fallback_message: &str) -> Self {
        match err.downcast::<AcpError>() {
            Ok(acp) => acp,
            Err(err) => {
                let original = err.to_string();
                let message = if original.trim().is_empty() {
                    fallback_message.to_string()
                } else {
                    original
                };
                Self {
                    code: fallback_code,
                    message,
                    cause: Some(err.into()),
                }
            },
        }
    }

    /// Caller-facing rendering: message plus the deterministic next step.
    #[must_use]
    pub fn user_message(&self) -> String {
        format!(
            "ACP error ({}): {}\nNext step: {}",
            self.code,
            self.message,
            self.code.hint()
        )
    }
}

/// Run an operation and normalize any failure through [`AcpError::wrap`].
///
/// This is the single choke point that keeps every failure surfaced above
/// this layer typed.
pub async fn guard<T, F>(
    fallback_code: AcpErrorCode,
    fallback_message: &str,
    op: F,
) -> AcpResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    op.await
        .map_err(|err| AcpError::wrap(err, fallback_code, fallback_message))
}
