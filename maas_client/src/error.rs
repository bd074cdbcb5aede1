//! MAAS client error types.

use thiserror::Error;

pub type MaasResult<T> = Result<T, MaasError>;

#[derive(Debug, Error)]
pub enum MaasError {
    #[error("Invalid MAAS API key: expected 'consumer:token:secret'")]
    InvalidApiKey,

    #[error("Invalid MAAS URL: {0}")]
    InvalidUrl(String),

    #[error("MAAS returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode MAAS response: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out")]
    Timeout,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl MaasError {
    /// HTTP status reported by the upstream, when this is a status error.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
