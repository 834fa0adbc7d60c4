//! Plain-text views of gateway responses.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{
    domain::{AnalysisResult, Severity},
    protocol::{AnalysisSummary, HealthReport},
};

fn default_severity_description(risk_level: &str) -> &'static str {
    match risk_level.to_ascii_lowercase().as_str() {
        "normal" | "low" => "No immediate concerns detected",
        "moderate" => "Moderate stone burden - regular monitoring recommended",
        "severe" | "high" => "Severe stone burden - immediate medical attention recommended",
        _ => "Assessment completed",
    }
}

/// The reported severity, or one derived from the risk level.
pub fn severity(result: &AnalysisResult) -> Severity {
    if let Some(severity) = &result.summary.severity {
        return severity.clone();
    }
    let risk = result.risk_level();
    let level = match risk.to_ascii_lowercase().as_str() {
        "normal" | "low" => "Normal",
        "moderate" => "Moderate",
        _ => "Severe",
    };
    Severity {
        level: level.to_string(),
        description: default_severity_description(&risk).to_string(),
        color: String::new(),
    }
}

pub fn render_analysis(result: &AnalysisResult) -> String {
    let mut out = String::new();
    let summary = &result.summary;
    let severity = severity(result);

    if let Some(id) = result.analysis_id {
        let _ = writeln!(out, "Analysis #{}", id.0);
    }
    if let Some(filename) = result.metadata.get("filename").and_then(|v| v.as_str()) {
        let _ = writeln!(out, "File:            {filename}");
    }
    if !result.analysis_timestamp.is_empty() {
        let _ = writeln!(out, "Analyzed at:     {}", result.analysis_timestamp);
    }
    let _ = writeln!(out, "Stones detected: {}", summary.total_stones);
    let _ = writeln!(out, "Largest stone:   {:.1}mm", summary.largest_stone_mm);
    let _ = writeln!(
        out,
        "Avg confidence:  {:.1}%",
        summary.average_confidence * 100.0
    );
    let _ = writeln!(out, "Risk level:      {}", result.risk_level());
    let _ = writeln!(out, "Severity:        {} - {}", severity.level, severity.description);

    if !result.detections.is_empty() {
        let _ = writeln!(out, "\nDetections:");
        for stone in &result.detections {
            let _ = writeln!(
                out,
                "  Stone #{} ({}): {}mm, {}, confidence {:.1}%, {:.0}px, bbox [{}]",
                stone.id,
                stone.kind,
                stone.diameter_mm,
                stone.position.as_deref().unwrap_or("position unknown"),
                stone.confidence.unwrap_or(0.0) * 100.0,
                stone.diameter_px,
                stone
                    .bbox
                    .iter()
                    .map(|c| format!("{c:.0}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    if !result.recommendations.is_empty() {
        let _ = writeln!(out, "\nRecommendations:");
        for (idx, rec) in result.recommendations.iter().enumerate() {
            let _ = writeln!(out, "  {}. {rec}", idx + 1);
        }
    }

    if let Some(dimensions) = result.metadata.get("image_dimensions").and_then(|v| v.as_str()) {
        let _ = writeln!(out, "\nDimensions:      {dimensions}");
    }
    if let Some(scale) = result
        .metadata
        .get("scale_factor_mm_per_pixel")
        .and_then(|v| v.as_f64())
    {
        let _ = writeln!(out, "Scale factor:    {scale:.3} mm/px");
    }
    out
}

pub fn render_history(items: &[AnalysisSummary]) -> String {
    if items.is_empty() {
        return "No analyses yet.\n".to_string();
    }
    let mut out = format!(
        "{:>6}  {:<24}  {:>6}  {:<9}  {}\n",
        "ID", "CREATED", "STONES", "RISK", "FILE"
    );
    for item in items {
        let _ = writeln!(
            out,
            "{:>6}  {:<24}  {:>6}  {:<9}  {}",
            item.analysis_id.0, item.created_at, item.total_stones, item.risk_level, item.filename
        );
    }
    out
}

pub fn render_health(report: &HealthReport) -> String {
    let mut out = format!(
        "status: {}\ngateway: {}\ninference api: {}\n",
        report.status, report.services.gateway, report.services.inference_api
    );
    if let Some(url) = &report.services.inference_url {
        let _ = writeln!(out, "inference url: {url}");
    }
    if let Some(error) = &report.services.error {
        let _ = writeln!(out, "error: {error}");
    }
    out
}

/// Decodes the annotated image, accepting bare base64 or a `data:` URL.
pub fn annotated_image_bytes(result: &AnalysisResult) -> Result<Option<Vec<u8>>> {
    let Some(encoded) = result.annotated_image.as_deref() else {
        return Ok(None);
    };
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .context("annotated image is not valid base64")?;
    Ok(Some(bytes))
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
