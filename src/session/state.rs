//! Session lifecycle states

/// State of the current session
///
/// Owned by [`SessionController`](super::SessionController); everything
/// else only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Waiting for a wake word or start command
    #[default]
    Idle,
    /// Transport handshake in progress; frames are dropped
    Connecting,
    /// Audio streams to the backend
    Active,
    /// Tearing the session down
    Closing,
}

impl SessionState {
    /// Whether a session is in progress
    #[must_use]
    pub const fn in_session(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
        }
    }
}
