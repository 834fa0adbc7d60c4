use std::fs;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub inference_url: String,
    pub inference_timeout_seconds: u64,
    pub firebase_project_id: Option<String>,
    pub firebase_api_key: Option<String>,
    pub environment: String,
    pub cors_allow_origin: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            database_url: "sqlite://./data/stonescan.db".into(),
            inference_url: "http://localhost:5000".into(),
            inference_timeout_seconds: 120,
            firebase_project_id: None,
            firebase_api_key: None,
            environment: "development".into(),
            cors_allow_origin: None,
        }
    }
}

/// Keys accepted in `server.toml`.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    inference_url: Option<String>,
    inference_timeout_seconds: Option<u64>,
    firebase_project_id: Option<String>,
    firebase_api_key: Option<String>,
    environment: Option<String>,
    cors_allow_origin: Option<String>,
}

impl Settings {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file: FileSettings = toml::from_str(raw).context("invalid server.toml")?;
        if let Some(v) = file.bind_addr {
            self.server_bind = v;
        }
        if let Some(v) = file.database_url {
            self.database_url = v;
        }
        if let Some(v) = file.inference_url {
            self.inference_url = v;
        }
        if let Some(v) = file.inference_timeout_seconds {
            self.inference_timeout_seconds = v;
        }
        if file.firebase_project_id.is_some() {
            self.firebase_project_id = file.firebase_project_id;
        }
        if file.firebase_api_key.is_some() {
            self.firebase_api_key = file.firebase_api_key;
        }
        if let Some(v) = file.environment {
            self.environment = v;
        }
        if file.cors_allow_origin.is_some() {
            self.cors_allow_origin = file.cors_allow_origin;
        }
        Ok(())
    }

    /// Later names in each list win over earlier ones.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let pick = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .filter(|v| !v.trim().is_empty())
                .last()
        };

        if let Some(v) = pick(&["SERVER_BIND", "APP__BIND_ADDR"]) {
            self.server_bind = v;
        }
        if let Some(v) = pick(&["DATABASE_URL", "APP__DATABASE_URL"]) {
            self.database_url = v;
        }
        if let Some(v) = pick(&["FLASK_API_URL", "INFERENCE_API_URL", "APP__INFERENCE_URL"]) {
            self.inference_url = v;
        }
        if let Some(v) = pick(&["APP__INFERENCE_TIMEOUT_SECONDS"]) {
            match v.parse::<u64>() {
                Ok(parsed) => self.inference_timeout_seconds = parsed,
                Err(_) => warn!(value = %v, "ignoring invalid APP__INFERENCE_TIMEOUT_SECONDS"),
            }
        }
        if let Some(v) = pick(&["FIREBASE_PROJECT_ID", "APP__FIREBASE_PROJECT_ID"]) {
            self.firebase_project_id = Some(v);
        }
        if let Some(v) = pick(&["FIREBASE_API_KEY", "APP__FIREBASE_API_KEY"]) {
            self.firebase_api_key = Some(v);
        }
        if let Some(v) = pick(&["NODE_ENV", "APP__ENVIRONMENT"]) {
            self.environment = v;
        }
        if let Some(v) = pick(&["APP__CORS_ALLOW_ORIGIN"]) {
            self.cors_allow_origin = Some(v);
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.inference_url)
            .with_context(|| format!("invalid inference url '{}'", self.inference_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("inference url must be http or https, got '{}'", url.scheme());
        }
        if self.inference_timeout_seconds == 0 {
            bail!("inference timeout must be at least one second");
        }
        Ok(())
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        settings.apply_file(&raw)?;
    }
    settings.apply_env(|name| std::env::var(name).ok());
    settings.validate()?;

    if settings.firebase_project_id.is_none() {
        warn!("FIREBASE_PROJECT_ID is not set; session verification will fail");
    }
    if settings.firebase_api_key.is_none() {
        warn!("FIREBASE_API_KEY is not set; email/password and OAuth sign-in are disabled");
    }

    Ok(settings)
}

/// Turns a bare path or `sqlite:` path into a `sqlite://` URL. Storage
/// creates the parent directory when it opens the pool.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
