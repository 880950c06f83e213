use thiserror::Error;

/// Top-level error type for latchkey.
///
/// Every variant maps to a short, stable machine-readable code (see [`LatchkeyError::code`])
/// which is what clients see; the display text is the human message.
#[derive(Debug, Error)]
pub enum LatchkeyError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("device '{0}' is not paired")]
    InvalidDevice(String),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("no pending ceremony; request new options and retry")]
    NoPendingCeremony,

    #[error("no passkeys registered for this user")]
    NoPasskeys,

    #[error("credential is not registered for this user")]
    UnknownCredential,

    #[error("ceremony verification failed")]
    CeremonyRejected,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("malformed control message: {0}")]
    MalformedControlMessage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LatchkeyError {
    /// Stable error code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidDevice(_) => "invalid_device",
            Self::UnknownDevice(_) => "unknown_device",
            Self::NoPendingCeremony => "no_pending_ceremony",
            Self::NoPasskeys => "no_passkeys",
            Self::UnknownCredential => "unknown_credential",
            Self::CeremonyRejected => "ceremony_rejected",
            Self::AuthenticationFailed => "authentication_failed",
            Self::MalformedControlMessage(_) => "malformed_control_message",
            Self::Internal(_) => "internal",
        }
    }

    /// Shorthand for an `InvalidInput` built from anything string-like.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T, E = LatchkeyError> = std::result::Result<T, E>;
