//! Identity Toolkit REST client: email/password and IdP sign-in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::auth_messages::code_for_provider_message;
use tracing::{debug, warn};

use crate::IdentityError;

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const IDP_REQUEST_URI: &str = "http://localhost";

/// Tokens issued after a successful sign-in or sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResult {
    pub id_token: String,
    pub local_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<String>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<SignInResult, IdentityError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignInResult, IdentityError>;

    /// Exchanges a provider credential (e.g. a Google ID token) for a session.
    async fn sign_in_with_idp(
        &self,
        provider_id: &str,
        provider_id_token: &str,
    ) -> Result<SignInResult, IdentityError>;
}

/// Used when no web API key is configured.
pub struct UnconfiguredProvider;

#[async_trait]
impl CredentialProvider for UnconfiguredProvider {
    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _display_name: Option<&str>,
    ) -> Result<SignInResult, IdentityError> {
        Err(missing_api_key())
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<SignInResult, IdentityError> {
        Err(missing_api_key())
    }

    async fn sign_in_with_idp(
        &self,
        _provider_id: &str,
        _provider_id_token: &str,
    ) -> Result<SignInResult, IdentityError> {
        Err(missing_api_key())
    }
}

fn missing_api_key() -> IdentityError {
    IdentityError::NotConfigured("missing Firebase web API key".to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest<'a> {
    post_body: String,
    request_uri: &'a str,
    return_idp_credential: bool,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct IdentityToolkitClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl IdentityToolkitClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self::with_base_url(http, IDENTITY_TOOLKIT_URL, api_key)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &B,
        idp_flow: bool,
    ) -> Result<SignInResult, IdentityError> {
        let url = format!("{}/accounts:{method}", self.base_url);
        debug!(%method, "identity toolkit request");
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<SignInResult>()
                .await
                .map_err(|e| IdentityError::Transport(format!("malformed response: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ProviderErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or_else(|_| format!("HTTP {status}"));
        let code = code_for_provider_message(&message, idp_flow);
        warn!(%method, %status, code, "identity toolkit rejected request");
        Err(IdentityError::Provider { code, message })
    }
}

#[async_trait]
impl CredentialProvider for IdentityToolkitClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<SignInResult, IdentityError> {
        let body = PasswordRequest {
            email,
            password,
            display_name,
            return_secure_token: true,
        };
        self.call("signUp", &body, false).await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignInResult, IdentityError> {
        let body = PasswordRequest {
            email,
            password,
            display_name: None,
            return_secure_token: true,
        };
        self.call("signInWithPassword", &body, false).await
    }

    async fn sign_in_with_idp(
        &self,
        provider_id: &str,
        provider_id_token: &str,
    ) -> Result<SignInResult, IdentityError> {
        let body = IdpRequest {
            post_body: format!("id_token={provider_id_token}&providerId={provider_id}"),
            request_uri: IDP_REQUEST_URI,
            return_idp_credential: true,
            return_secure_token: true,
        };
        self.call("signInWithIdp", &body, true).await
    }
}

#[cfg(test)]
#[path = "tests/toolkit_tests.rs"]
mod tests;
