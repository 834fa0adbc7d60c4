//! Typed client for the StoneScan gateway.
//!
//! The gateway keeps the signed-in user in the `fb_token` cookie. The client
//! captures that cookie from auth responses and replays it on protected
//! routes, so callers can persist [`GatewayClient::session_token`] between
//! runs.

use std::path::Path;

use reqwest::{header, multipart, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{AnalysisId, AnalysisResult},
    error::ApiError,
    protocol::{
        AnalysisSummary, ChatRequest, ChatResponse, HealthReport, LoginRequest, OAuthRequest,
        RegisterRequest, SessionRequest, SessionResponse, SESSION_COOKIE,
    },
    validation::{check_upload, UploadRejection},
};
use tracing::{debug, info};
use url::Url;

pub mod error;

pub use error::ClientError;

pub type Result<T> = std::result::Result<T, ClientError>;

/// An image picked by the user, checked before it is sent.
#[derive(Debug, Clone)]
pub struct ScanUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ScanUpload {
    pub fn from_path(path: &Path, bytes: Vec<u8>) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        Self {
            filename,
            content_type,
            bytes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(ClientError::InvalidUpload("Please select a file to upload."));
        }
        check_upload(&self.content_type, self.bytes.len()).map_err(|rejection| match rejection {
            UploadRejection::UnsupportedType => {
                ClientError::InvalidUpload("Please upload only JPEG or PNG images")
            }
            UploadRejection::TooLarge => {
                ClientError::InvalidUpload("File too large. Maximum size is 10MB")
            }
        })
    }
}

/// A rendered PDF report.
#[derive(Debug, Clone)]
pub struct Report {
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub struct GatewayClient {
    http: Client,
    server_url: String,
    session: Option<String>,
}

impl GatewayClient {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self> {
        let parsed = Url::parse(server_url.trim())
            .map_err(|e| ClientError::InvalidServerUrl(format!("{server_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidServerUrl(server_url.to_string()));
        }
        Ok(Self {
            http,
            server_url: server_url.trim().trim_end_matches('/').to_string(),
            session: None,
        })
    }

    pub fn with_session(mut self, token: Option<String>) -> Self {
        self.session = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.session.as_deref().ok_or(ClientError::NotSignedIn)?;
        Ok(request.header(header::COOKIE, format!("{SESSION_COOKIE}={token}")))
    }

    /// Trades a provider ID token for the gateway session cookie.
    pub async fn establish_session(&mut self, id_token: &str) -> Result<SessionResponse> {
        let request = self.http.post(self.url("/api/auth/session")).json(&SessionRequest {
            id_token: Some(id_token.to_string()),
        });
        self.session_call(request).await
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<SessionResponse> {
        let request = self.http.post(self.url("/api/auth/login")).json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        });
        self.session_call(request).await
    }

    pub async fn register(&mut self, form: &RegisterRequest) -> Result<SessionResponse> {
        let request = self.http.post(self.url("/api/auth/register")).json(form);
        self.session_call(request).await
    }

    pub async fn login_with_oauth(
        &mut self,
        provider_id_token: &str,
        provider_id: Option<&str>,
    ) -> Result<SessionResponse> {
        let request = self.http.post(self.url("/api/auth/oauth")).json(&OAuthRequest {
            provider_id_token: provider_id_token.to_string(),
            provider_id: provider_id.map(str::to_string),
        });
        self.session_call(request).await
    }

    async fn session_call(&mut self, request: RequestBuilder) -> Result<SessionResponse> {
        let response = check(request.send().await?).await?;
        let token = session_cookie_value(&response);
        let body: SessionResponse = response.json().await?;
        if let Some(token) = token {
            info!(uid = ?body.uid, "session established");
            self.session = Some(token);
        }
        Ok(body)
    }

    /// Clears the server cookie and forgets the local session.
    pub async fn logout(&mut self) -> Result<()> {
        let response = self.http.delete(self.url("/api/auth/session")).send().await;
        self.session = None;
        check(response?).await?;
        Ok(())
    }

    pub async fn detect(&self, upload: &ScanUpload) -> Result<AnalysisResult> {
        upload.validate()?;
        let part = multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.filename.clone())
            .mime_str(&upload.content_type)?;
        let form = multipart::Form::new().part("image", part);
        let request = self.authorized(self.http.post(self.url("/api/detect")))?;
        debug!(filename = %upload.filename, size = upload.bytes.len(), "uploading scan");
        decode(request.multipart(form)).await
    }

    pub async fn detect_health(&self) -> Result<HealthReport> {
        decode(self.http.get(self.url("/api/detect"))).await
    }

    pub async fn report(&self, result: &AnalysisResult) -> Result<Report> {
        let request = self.authorized(self.http.post(self.url("/api/report")))?;
        let response = check(request.json(result).send().await?).await?;
        let filename = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename)
            .unwrap_or_else(|| "kidney_scan_report.pdf".to_string());
        let bytes = response.bytes().await?.to_vec();
        Ok(Report { filename, bytes })
    }

    /// Asks the assistant a question, with the stones of `result` as context.
    pub async fn ask(
        &self,
        question: &str,
        result: Option<&AnalysisResult>,
    ) -> Result<ChatResponse> {
        let body = ChatRequest {
            question: question.to_string(),
            stones_data: result.map(AnalysisResult::chat_stones).unwrap_or_default(),
        };
        let request = self.authorized(self.http.post(self.url("/api/chat")))?;
        decode(request.json(&body)).await
    }

    pub async fn results(&self, limit: Option<u32>) -> Result<Vec<AnalysisSummary>> {
        let mut request = self.authorized(self.http.get(self.url("/api/results")))?;
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        decode(request).await
    }

    pub async fn result(&self, analysis_id: AnalysisId) -> Result<AnalysisResult> {
        let request =
            self.authorized(self.http.get(self.url(&format!("/api/results/{}", analysis_id.0))))?;
        decode(request).await
    }
}

async fn decode<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = check(request.send().await?).await?;
    Ok(response.json().await?)
}

/// Turns a non-success response into [`ClientError::Rejected`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ApiError>(&text)
        .unwrap_or_else(|_| ApiError::new(fallback_message(status, &text)));
    Err(ClientError::Rejected {
        status: status.as_u16(),
        body,
    })
}

fn fallback_message(status: StatusCode, text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    } else {
        text.to_string()
    }
}

fn session_cookie_value(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn attachment_filename(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .find(|name| !name.is_empty())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
