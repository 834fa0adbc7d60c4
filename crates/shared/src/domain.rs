use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(AnalysisId);

/// Identity-provider user id (the `sub` claim of a verified ID token).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub String);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const DEFAULT_DETECTION_TYPE: &str = "kidney_stone";

fn default_detection_type() -> String {
    DEFAULT_DETECTION_TYPE.to_string()
}

/// One identified stone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: u32,
    /// `[x1, y1, x2, y2]` in image pixels.
    #[serde(default)]
    pub bbox: [f64; 4],
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub diameter_px: f64,
    #[serde(default)]
    pub diameter_mm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(rename = "type", default = "default_detection_type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Severity {
    pub level: String,
    pub description: String,
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    /// Classification used when the inference service leaves `risk_level` out.
    pub fn from_largest_stone_mm(largest_mm: f64) -> Self {
        if largest_mm > 10.0 {
            RiskLevel::High
        } else if largest_mm > 5.0 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        }
    }
}

fn unknown_risk() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub total_stones: u32,
    #[serde(default)]
    pub largest_stone_mm: f64,
    #[serde(default)]
    pub average_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default = "unknown_risk")]
    pub risk_level: String,
}

impl Default for Summary {
    fn default() -> Self {
        Self {
            total_stones: 0,
            largest_stone_mm: 0.0,
            average_confidence: 0.0,
            severity: None,
            risk_level: unknown_risk(),
        }
    }
}

/// Detection result as returned by `/predict`, enriched by the gateway.
///
/// Fields the gateway does not know about are kept in `extra` so that a
/// result can be forwarded to `/generate-report` without losing data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
    #[serde(default)]
    pub analysis_timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<AnalysisId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisResult {
    /// Risk level reported upstream, or derived from the largest stone.
    pub fn risk_level(&self) -> String {
        let reported = self.summary.risk_level.trim();
        if reported.is_empty() || reported == "unknown" {
            return RiskLevel::from_largest_stone_mm(self.summary.largest_stone_mm)
                .as_str()
                .to_string();
        }
        reported.to_string()
    }

    /// Merges `extra` into `metadata`; keys in `extra` overwrite.
    pub fn merge_metadata(&mut self, extra: Map<String, Value>) {
        for (key, value) in extra {
            self.metadata.insert(key, value);
        }
    }

    pub fn chat_stones(&self) -> Vec<ChatStone> {
        self.detections.iter().map(ChatStone::from).collect()
    }
}

/// How a detection is described to the chatbot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStone {
    pub id: u32,
    pub diameter_mm: String,
    pub position: String,
    pub confidence: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<&Detection> for ChatStone {
    fn from(detection: &Detection) -> Self {
        Self {
            id: detection.id,
            diameter_mm: format!("{} mm", detection.diameter_mm),
            position: detection
                .position
                .clone()
                .unwrap_or_else(|| "unspecified".to_string()),
            confidence: format!("{:.1}%", detection.confidence.unwrap_or(0.0) * 100.0),
            kind: detection.kind.clone(),
        }
    }
}
