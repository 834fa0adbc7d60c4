use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{AnalysisId, AnalysisResult, Uid},
    protocol::AnalysisSummary,
};

/// History of analyses, one row per successful upload.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub analysis_id: AnalysisId,
    pub uid: Uid,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub result: AnalysisResult,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn record_analysis(
        &self,
        uid: &Uid,
        filename: &str,
        result: &AnalysisResult,
    ) -> Result<AnalysisId> {
        let result_json =
            serde_json::to_string(result).context("failed to serialize analysis result")?;
        let rec = sqlx::query(
            "INSERT INTO analyses (uid, filename, total_stones, risk_level, result_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&uid.0)
        .bind(filename)
        .bind(i64::from(result.summary.total_stones))
        .bind(result.risk_level())
        .bind(result_json)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert analysis")?;
        Ok(AnalysisId(rec.get::<i64, _>(0)))
    }

    /// Newest first.
    pub async fn list_analyses(&self, uid: &Uid, limit: u32) -> Result<Vec<AnalysisSummary>> {
        let rows = sqlx::query(
            "SELECT id, filename, created_at, total_stones, risk_level
             FROM analyses
             WHERE uid = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(&uid.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("failed to list analyses")?;

        Ok(rows
            .into_iter()
            .map(|r| AnalysisSummary {
                analysis_id: AnalysisId(r.get::<i64, _>(0)),
                filename: r.get::<String, _>(1),
                created_at: r
                    .get::<DateTime<Utc>, _>(2)
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                total_stones: u32::try_from(r.get::<i64, _>(3)).unwrap_or_default(),
                risk_level: r.get::<String, _>(4),
            })
            .collect())
    }

    /// Returns `None` for unknown ids and for analyses owned by another user.
    pub async fn load_analysis(
        &self,
        uid: &Uid,
        analysis_id: AnalysisId,
    ) -> Result<Option<StoredAnalysis>> {
        let row = sqlx::query(
            "SELECT id, uid, filename, created_at, result_json
             FROM analyses
             WHERE id = ? AND uid = ?",
        )
        .bind(analysis_id.0)
        .bind(&uid.0)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load analysis")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let result_json: String = row.get(4);
        let mut result: AnalysisResult = serde_json::from_str(&result_json)
            .with_context(|| format!("corrupt analysis row {}", analysis_id.0))?;
        result.analysis_id = Some(analysis_id);

        Ok(Some(StoredAnalysis {
            analysis_id: AnalysisId(row.get::<i64, _>(0)),
            uid: Uid(row.get::<String, _>(1)),
            filename: row.get::<String, _>(2),
            created_at: row.get::<DateTime<Utc>, _>(3),
            result,
        }))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
