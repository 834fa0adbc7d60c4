use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{AnalysisId, AnalysisResult, ChatStone, Detection, Summary};

pub const SESSION_COOKIE: &str = "fb_token";
/// Five days.
pub const SESSION_MAX_AGE_SECONDS: i64 = 60 * 60 * 24 * 5;
pub const GATEWAY_API_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub agree_terms: bool,
    #[serde(default)]
    pub agree_privacy: bool,
}

impl RegisterRequest {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

pub const DEFAULT_OAUTH_PROVIDER: &str = "google.com";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthRequest {
    #[serde(default)]
    pub provider_id_token: String,
    #[serde(default)]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub stones_data: Vec<ChatStone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Body sent to `/generate-report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub detections: Vec<Detection>,
    pub summary: Summary,
    pub metadata: Map<String, Value>,
    pub annotated_image: Option<String>,
    pub analysis_timestamp: String,
}

impl ReportRequest {
    /// Builds a report body, stamping `now` when the result carries no timestamp.
    pub fn from_result(result: &AnalysisResult, now: &str) -> Self {
        let analysis_timestamp = if result.analysis_timestamp.trim().is_empty() {
            now.to_string()
        } else {
            result.analysis_timestamp.clone()
        };
        Self {
            detections: result.detections.clone(),
            summary: result.summary.clone(),
            metadata: result.metadata.clone(),
            annotated_image: result.annotated_image.clone(),
            analysis_timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub analysis_id: AnalysisId,
    pub filename: String,
    pub created_at: String,
    pub total_stones: u32,
    pub risk_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthServices {
    pub gateway: String,
    pub inference_api: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: String,
    pub services: HealthServices,
}
