use latchkey_core::LatchkeyError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid server URL '{0}': expected http(s):// or ws(s)://")]
    InvalidServerUrl(String),

    #[error("control connection failed: {0}")]
    Connection(#[from] tungstenite::Error),

    #[error("server rejected AUTH: {0}")]
    Rejected(String),

    #[error("could not sign AUTH: {0}")]
    Signing(#[from] LatchkeyError),
}
