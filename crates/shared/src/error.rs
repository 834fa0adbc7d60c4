use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON error body returned by every gateway route: `{error, details?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{error}")]
pub struct ApiError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<Value>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }

    /// Detail text when `details` is a plain string.
    pub fn detail_text(&self) -> Option<&str> {
        self.details.as_ref().and_then(Value::as_str)
    }
}
