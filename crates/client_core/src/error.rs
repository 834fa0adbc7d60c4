use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The gateway answered with an error body.
    #[error("{} (HTTP {status})", .body.error)]
    Rejected { status: u16, body: ApiError },
    #[error("not signed in; run `login` first")]
    NotSignedIn,
    #[error("{0}")]
    InvalidUpload(&'static str),
    #[error("invalid server url: {0}")]
    InvalidServerUrl(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// A 401 from a protected route means the stored session is no longer usable.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::NotSignedIn) || self.status() == Some(401)
    }
}
