/// Failures while verifying ID tokens or talking to the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider is not configured: {0}")]
    NotConfigured(String),

    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    #[error("invalid token signature: {0}")]
    InvalidSignature(String),

    #[error("token has expired")]
    Expired,

    #[error("invalid audience")]
    InvalidAudience,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("token has no subject")]
    MissingSubject,

    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(String),

    #[error("no matching key for kid '{0}'")]
    NoMatchingKey(String),

    /// The provider rejected a credential. `code` is a normalised `auth/*` code.
    #[error("{code}: {message}")]
    Provider { code: &'static str, message: String },

    #[error("identity provider request failed: {0}")]
    Transport(String),
}

impl IdentityError {
    /// Whether the token itself is bad, as opposed to a server-side problem.
    pub fn is_invalid_token(&self) -> bool {
        matches!(
            self,
            IdentityError::InvalidFormat(_)
                | IdentityError::InvalidSignature(_)
                | IdentityError::InvalidAudience
                | IdentityError::InvalidIssuer
                | IdentityError::MissingSubject
                | IdentityError::NoMatchingKey(_)
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            IdentityError::NotConfigured(_) | IdentityError::KeyFetch(_)
        )
    }
}
