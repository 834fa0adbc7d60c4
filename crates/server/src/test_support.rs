//! In-process fakes for the inference service and the credential provider.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use identity::{
    testing::{test_verifier, valid_token},
    CredentialProvider, IdentityError, SignInResult,
};
use inference::{ImageUpload, InferenceApi, InferenceError};
use serde_json::{json, Map};
use shared::{
    domain::{AnalysisResult, Detection, Summary},
    protocol::{ChatRequest, ChatResponse, ReportRequest},
};
use storage::Storage;

use crate::api::ApiContext;

pub(crate) const FAKE_PDF: &[u8] = b"%PDF-1.4 fake report";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upstream {
    Ok,
    Failing,
    Down,
    Slow,
}

impl Upstream {
    fn error(self) -> Option<InferenceError> {
        match self {
            Upstream::Ok => None,
            Upstream::Failing => Some(InferenceError::Upstream {
                status: 500,
                reason: "Internal Server Error".into(),
                body: "model crashed".into(),
            }),
            Upstream::Down => Some(InferenceError::Unavailable("connection refused".into())),
            Upstream::Slow => Some(InferenceError::Timeout),
        }
    }
}

pub(crate) struct FakeInference {
    pub(crate) mode: Upstream,
    pub(crate) uploads: Mutex<Vec<ImageUpload>>,
    pub(crate) reports: Mutex<Vec<ReportRequest>>,
}

impl FakeInference {
    pub(crate) fn new(mode: Upstream) -> Arc<Self> {
        Arc::new(Self {
            mode,
            uploads: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
        })
    }
}

pub(crate) fn sample_result() -> AnalysisResult {
    let mut metadata = Map::new();
    metadata.insert("model".into(), json!("yolov8"));
    metadata.insert("filename".into(), json!("upstream-name.png"));
    AnalysisResult {
        detections: vec![Detection {
            id: 1,
            bbox: [10.0, 20.0, 60.0, 80.0],
            confidence: Some(0.91),
            diameter_px: 50.0,
            diameter_mm: 6.5,
            position: Some("left kidney".into()),
            kind: "kidney_stone".into(),
        }],
        summary: Summary {
            total_stones: 1,
            largest_stone_mm: 6.5,
            average_confidence: 0.91,
            severity: None,
            risk_level: "moderate".into(),
        },
        recommendations: vec!["Drink more water".into()],
        metadata,
        annotated_image: Some("aGVsbG8=".into()),
        analysis_timestamp: "2026-10-17T08:00:00Z".into(),
        analysis_id: None,
        extra: Map::new(),
    }
}

#[async_trait]
impl InferenceApi for FakeInference {
    fn base_url(&self) -> &str {
        "http://inference.test"
    }

    async fn predict(&self, image: ImageUpload) -> Result<AnalysisResult, InferenceError> {
        if let Some(err) = self.mode.error() {
            return Err(err);
        }
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push(image);
        }
        Ok(sample_result())
    }

    async fn generate_report(&self, report: &ReportRequest) -> Result<Vec<u8>, InferenceError> {
        if let Some(err) = self.mode.error() {
            return Err(err);
        }
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
        Ok(FAKE_PDF.to_vec())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        if let Some(err) = self.mode.error() {
            return Err(err);
        }
        Ok(ChatResponse {
            response: format!(
                "You asked about {} stone(s): {}",
                request.stones_data.len(),
                request.question
            ),
        })
    }

    async fn health(&self) -> Result<bool, InferenceError> {
        match self.mode {
            Upstream::Ok => Ok(true),
            Upstream::Failing => Ok(false),
            other => Err(other.error().unwrap_or(InferenceError::Timeout)),
        }
    }
}

/// Accepts `alice@example.com` / `secret123`; issues tokens the test verifier trusts.
pub(crate) struct FakeCredentials;

fn signed_in(uid: &str) -> SignInResult {
    SignInResult {
        id_token: valid_token(uid),
        local_id: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        refresh_token: None,
        expires_in: Some("3600".into()),
    }
}

fn provider_error(code: &'static str) -> IdentityError {
    IdentityError::Provider {
        code,
        message: code.to_string(),
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        _display_name: Option<&str>,
    ) -> Result<SignInResult, IdentityError> {
        if email == "alice@example.com" {
            return Err(provider_error("auth/email-already-in-use"));
        }
        Ok(signed_in("new-user"))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignInResult, IdentityError> {
        match (email, password) {
            ("alice@example.com", "secret123") => Ok(signed_in("alice")),
            ("locked@example.com", _) => Err(provider_error("auth/too-many-requests")),
            _ => Err(provider_error("auth/invalid-credential")),
        }
    }

    async fn sign_in_with_idp(
        &self,
        provider_id: &str,
        provider_id_token: &str,
    ) -> Result<SignInResult, IdentityError> {
        if provider_id == "google.com" && provider_id_token == "google-credential" {
            Ok(signed_in("google-user"))
        } else {
            Err(provider_error("auth/invalid-credential"))
        }
    }
}

pub(crate) async fn test_context(mode: Upstream) -> (ApiContext, Arc<FakeInference>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let inference = FakeInference::new(mode);
    let ctx = ApiContext {
        storage,
        verifier: Arc::new(test_verifier()),
        credentials: Arc::new(FakeCredentials),
        inference: inference.clone(),
        expose_error_details: true,
    };
    (ctx, inference)
}
