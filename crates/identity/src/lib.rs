//! Firebase Authentication for the gateway: ID-token verification and the
//! Identity Toolkit sign-in API.

mod error;
pub mod toolkit;
pub mod verifier;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::IdentityError;
pub use toolkit::{CredentialProvider, IdentityToolkitClient, SignInResult, UnconfiguredProvider};
pub use verifier::{
    FirebaseTokenVerifier, Jwk, TokenVerifier, UnconfiguredVerifier, VerifiedIdentity,
};
