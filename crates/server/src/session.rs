//! The `fb_token` session cookie and the extractor that guards protected routes.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use identity::{IdentityError, VerifiedIdentity};
use shared::{
    error::ApiError,
    protocol::{SESSION_COOKIE, SESSION_MAX_AGE_SECONDS},
};
use tracing::{debug, error};

use crate::{api::ApiFailure, app_state::AppState};

pub(crate) fn session_cookie(id_token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={id_token}; Path=/; Max-Age={SESSION_MAX_AGE_SECONDS}; HttpOnly; SameSite=Lax"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub(crate) fn cleared_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}

pub(crate) fn set_cookie_headers(cookie: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.insert(header::SET_COOKIE, value);
    }
    headers
}

/// Value of the session cookie, if the request carries a non-empty one.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Maps a verification failure of a freshly presented ID token.
pub(crate) fn verification_failure(err: &IdentityError, expose_details: bool) -> ApiFailure {
    match err {
        IdentityError::Expired => (StatusCode::UNAUTHORIZED, Json(ApiError::new("Token expired"))),
        e if e.is_invalid_token() => {
            (StatusCode::UNAUTHORIZED, Json(ApiError::new("Invalid token")))
        }
        e if e.is_configuration() => {
            error!(error = %e, "identity verifier misconfigured");
            let body = if expose_details {
                ApiError::with_details("Server configuration error", e.to_string())
            } else {
                ApiError::new("Server configuration error")
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new("Authentication failed")),
        ),
    }
}

/// A request whose session cookie verified successfully.
pub(crate) struct SessionUser(pub(crate) VerifiedIdentity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for SessionUser {
    type Rejection = ApiFailure;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new("Not authenticated")),
            ));
        };

        match state.api.verifier.verify(&token).await {
            Ok(identity) => Ok(SessionUser(identity)),
            Err(e) if e.is_configuration() => {
                Err(verification_failure(&e, state.api.expose_error_details))
            }
            Err(e) => {
                debug!(path = %parts.uri.path(), error = %e, "rejecting session cookie");
                Err((
                    StatusCode::UNAUTHORIZED,
                    Json(ApiError::with_details("Session expired", e.to_string())),
                ))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
