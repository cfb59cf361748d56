//! Failure taxonomy shared by the gateway and the client session library.
//!
//! Internal plumbing uses `anyhow`; anything that must be reported to a user
//! is expressed as an [`AuthError`] so the boundary can pick a status code and
//! a human-readable message without leaking the underlying cause.

/// Auth-facing failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed credentials or input. Reported, never retried.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The request collides with an existing record (e.g. email already registered).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Invalid or expired credential. The client clears its stored token.
    #[error("authorization failed: {0}")]
    Authorization(String),
    /// Persistence failure while looking up or provisioning a user.
    /// No session may be issued after this error.
    #[error("identity resolution failed: {0:#}")]
    IdentityResolution(#[source] anyhow::Error),
    /// Connectivity failure. The client keeps its token so the caller can retry.
    #[error("network error: {0}")]
    TransientNetwork(String),
}

impl AuthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Conflict(msg) | Self::Authorization(msg) => msg.clone(),
            Self::IdentityResolution(_) => {
                "We could not sign you in right now. Please try again.".into()
            }
            Self::TransientNetwork(_) => {
                "Unable to reach the server. Check your connection and try again.".into()
            }
        }
    }
}
