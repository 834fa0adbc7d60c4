//! Firebase ID-token verification against the securetoken JWKS.

use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use shared::domain::Uid;
use tracing::{debug, warn};

use crate::IdentityError;

pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);
/// Minimum gap between refreshes triggered by an unknown `kid` while the
/// cached key set is still fresh.
const JWKS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub uid: Uid,
    pub email: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

/// Stands in when no project id is configured; every verification fails
/// with [`IdentityError::NotConfigured`].
pub struct UnconfiguredVerifier;

#[async_trait]
impl TokenVerifier for UnconfiguredVerifier {
    async fn verify(&self, _id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        Err(IdentityError::NotConfigured(
            "missing Firebase project id".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

struct CachedKeys {
    keys: Vec<Jwk>,
    fetched_at: Instant,
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    #[serde(default)]
    sub: String,
    email: Option<String>,
}

pub struct FirebaseTokenVerifier {
    project_id: String,
    jwks_url: String,
    cached: RwLock<Option<CachedKeys>>,
    last_refresh_attempt: Mutex<Option<Instant>>,
    http: Option<reqwest::Client>,
}

impl FirebaseTokenVerifier {
    pub fn new(project_id: impl Into<String>, http: reqwest::Client) -> Self {
        Self::with_jwks_url(project_id, FIREBASE_JWKS_URL, http)
    }

    pub fn with_jwks_url(
        project_id: impl Into<String>,
        jwks_url: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            jwks_url: jwks_url.into(),
            cached: RwLock::new(None),
            last_refresh_attempt: Mutex::new(None),
            http: Some(http),
        }
    }

    /// Verifier with a fixed key set that never refreshes.
    pub fn with_static_keys(project_id: impl Into<String>, keys: Vec<Jwk>) -> Self {
        Self {
            project_id: project_id.into(),
            jwks_url: String::new(),
            cached: RwLock::new(Some(CachedKeys {
                keys,
                fetched_at: Instant::now(),
            })),
            last_refresh_attempt: Mutex::new(None),
            http: None,
        }
    }

    pub fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    async fn verify_jwt(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let header =
            decode_header(token).map_err(|e| IdentityError::InvalidFormat(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(IdentityError::InvalidFormat(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::InvalidFormat("missing kid in JWT header".to_string()))?;

        let key = self.find_key(&kid).await?;
        let decoding_key = DecodingKey::from_rsa_components(&key.n, &key.e)
            .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[self.issuer()]);

        let data = decode::<FirebaseClaims>(token, &decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => IdentityError::Expired,
                ErrorKind::InvalidAudience => IdentityError::InvalidAudience,
                ErrorKind::InvalidIssuer => IdentityError::InvalidIssuer,
                _ => IdentityError::InvalidSignature(e.to_string()),
            }
        })?;

        let claims = data.claims;
        if claims.sub.trim().is_empty() {
            return Err(IdentityError::MissingSubject);
        }
        Ok(VerifiedIdentity {
            uid: Uid(claims.sub),
            email: claims.email,
        })
    }

    async fn find_key(&self, kid: &str) -> Result<Jwk, IdentityError> {
        let (key, fresh) = self.lookup_cached(kid);
        if let Some(key) = key {
            return Ok(key);
        }
        if self.http.is_none() {
            return Err(IdentityError::NoMatchingKey(kid.to_string()));
        }

        if fresh {
            // Unknown kid against a fresh key set: a rotation is possible,
            // but refresh at most once per interval.
            if !self.claim_refresh_slot() {
                debug!(%kid, "unknown kid; key refresh throttled");
                return Err(IdentityError::NoMatchingKey(kid.to_string()));
            }
            if let Err(error) = self.refresh_keys().await {
                warn!(%kid, %error, "key refresh for unknown kid failed");
                return Err(IdentityError::NoMatchingKey(kid.to_string()));
            }
        } else {
            self.claim_refresh_slot();
            self.refresh_keys().await?;
        }

        self.lookup_cached(kid)
            .0
            .ok_or_else(|| IdentityError::NoMatchingKey(kid.to_string()))
    }

    /// The matching key, and whether the cached set is within its TTL.
    fn lookup_cached(&self, kid: &str) -> (Option<Jwk>, bool) {
        let Ok(cache) = self.cached.read() else {
            return (None, false);
        };
        let Some(cached) = cache.as_ref() else {
            return (None, false);
        };
        if self.http.is_some() && cached.fetched_at.elapsed() > JWKS_CACHE_TTL {
            return (None, false);
        }
        (cached.keys.iter().find(|k| k.kid == kid).cloned(), true)
    }

    /// Records a refresh attempt; false if one happened within the interval.
    fn claim_refresh_slot(&self) -> bool {
        let Ok(mut last) = self.last_refresh_attempt.lock() else {
            return false;
        };
        if last.is_some_and(|at| at.elapsed() < JWKS_MIN_REFRESH_INTERVAL) {
            return false;
        }
        *last = Some(Instant::now());
        true
    }

    async fn refresh_keys(&self) -> Result<(), IdentityError> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| IdentityError::KeyFetch("static key set".to_string()))?;

        debug!(url = %self.jwks_url, "refreshing signing keys");
        let response: JwksResponse = http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))?;

        let mut cache = self
            .cached
            .write()
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))?;
        *cache = Some(CachedKeys {
            keys: response.keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let token = id_token.trim();
        if token.is_empty() {
            return Err(IdentityError::InvalidFormat("empty token".to_string()));
        }
        self.verify_jwt(token).await
    }
}

#[cfg(test)]
#[path = "tests/verifier_tests.rs"]
mod tests;
