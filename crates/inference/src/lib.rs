//! Client for the external inference service that runs stone detection,
//! renders PDF reports and answers chatbot questions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use shared::{
    domain::AnalysisResult,
    protocol::{ChatRequest, ChatResponse, ReportRequest},
};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum InferenceError {
    /// The service answered with a non-success status.
    #[error("Inference API returned {status}: {reason}")]
    Upstream {
        status: u16,
        reason: String,
        body: String,
    },
    #[error("inference service unreachable: {0}")]
    Unavailable(String),
    #[error("inference request timed out")]
    Timeout,
    #[error("malformed inference response: {0}")]
    Malformed(String),
    #[error("inference request failed: {0}")]
    Request(String),
}

impl InferenceError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout
        } else if err.is_connect() {
            InferenceError::Unavailable(err.to_string())
        } else {
            InferenceError::Request(err.to_string())
        }
    }
}

/// An image as received from the user.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait InferenceApi: Send + Sync {
    fn base_url(&self) -> &str;
    async fn predict(&self, image: ImageUpload) -> Result<AnalysisResult, InferenceError>;
    async fn generate_report(&self, report: &ReportRequest) -> Result<Vec<u8>, InferenceError>;
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError>;
    /// `Ok(false)` when the service answers with a failure status.
    async fn health(&self) -> Result<bool, InferenceError>;
}

#[derive(Clone)]
pub struct HttpInferenceClient {
    http: Client,
    base_url: String,
}

impl HttpInferenceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Request(e.to_string()))?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn ensure_success(
    path: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!(%path, status = status.as_u16(), %body, "inference service error");
    Err(InferenceError::Upstream {
        status: status.as_u16(),
        reason: reason_phrase(status),
        body,
    })
}

fn reason_phrase(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown").to_string()
}

#[async_trait]
impl InferenceApi for HttpInferenceClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn predict(&self, image: ImageUpload) -> Result<AnalysisResult, InferenceError> {
        debug!(
            filename = %image.filename,
            size = image.bytes.len(),
            content_type = %image.content_type,
            "forwarding image to /predict"
        );
        let part = multipart::Part::bytes(image.bytes)
            .file_name(image.filename)
            .mime_str(&image.content_type)
            .map_err(|e| InferenceError::Request(e.to_string()))?;
        let form = multipart::Form::new().part("image", part);

        let response = self
            .http
            .post(self.url("/predict"))
            .multipart(form)
            .send()
            .await
            .map_err(InferenceError::from_transport)?;
        let response = ensure_success("/predict", response).await?;
        response
            .json::<AnalysisResult>()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))
    }

    async fn generate_report(&self, report: &ReportRequest) -> Result<Vec<u8>, InferenceError> {
        let response = self
            .http
            .post(self.url("/generate-report"))
            .json(report)
            .send()
            .await
            .map_err(InferenceError::from_transport)?;
        let response = ensure_success("/generate-report", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(InferenceError::from_transport)?;
        Ok(bytes.to_vec())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        let response = self
            .http
            .post(self.url("/chat"))
            .json(request)
            .send()
            .await
            .map_err(InferenceError::from_transport)?;
        let response = ensure_success("/chat", response).await?;
        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))
    }

    async fn health(&self) -> Result<bool, InferenceError> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(InferenceError::from_transport)?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
