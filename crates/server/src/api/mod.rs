use std::{fmt::Display, sync::Arc};

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        Multipart,
    },
    http::StatusCode,
    Json,
};
use chrono::{SecondsFormat, Utc};
use identity::{CredentialProvider, IdentityError, SignInResult, TokenVerifier, VerifiedIdentity};
use inference::{ImageUpload, InferenceApi, InferenceError};
use serde_json::{json, Map, Value};
use shared::{
    auth_messages::message_for_code,
    domain::{AnalysisId, AnalysisResult, Uid},
    error::ApiError,
    protocol::{
        AnalysisSummary, ChatRequest, ChatResponse, HealthReport, HealthServices, LoginRequest,
        OAuthRequest, RegisterRequest, ReportRequest, DEFAULT_OAUTH_PROVIDER,
        GATEWAY_API_VERSION,
    },
    validation::{
        check_upload, is_allowed_image_type, validate_login, validate_registration,
        UploadRejection,
    },
};
use storage::Storage;
use tracing::{error, info, warn};

use crate::session::verification_failure;

pub(crate) type ApiFailure = (StatusCode, Json<ApiError>);

pub(crate) const CHAT_FALLBACK: &str =
    "I apologize, but I'm having trouble connecting to the chat service. Please try again in a moment.";
pub(crate) const HISTORY_DEFAULT_LIMIT: u32 = 50;
const HISTORY_MAX_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub verifier: Arc<dyn TokenVerifier>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub inference: Arc<dyn InferenceApi>,
    pub expose_error_details: bool,
}

fn failure(status: StatusCode, error: impl Into<String>) -> ApiFailure {
    (status, Json(ApiError::new(error)))
}

pub(crate) fn malformed_body(rejection: JsonRejection) -> ApiFailure {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError::with_details(
            "Invalid request body",
            rejection.body_text(),
        )),
    )
}

pub(crate) fn malformed_query(rejection: QueryRejection) -> ApiFailure {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError::with_details(
            "Invalid query string",
            rejection.body_text(),
        )),
    )
}

pub(crate) fn analysis_not_found() -> ApiFailure {
    failure(StatusCode::NOT_FOUND, "Analysis not found")
}

fn internal(ctx: &ApiContext, e: impl Display) -> ApiFailure {
    error!(error = %e, "internal error");
    let body = if ctx.expose_error_details {
        ApiError::with_details("Internal server error", e.to_string())
    } else {
        ApiError::with_details("Internal server error", "Something went wrong")
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn verify_id_token(
    ctx: &ApiContext,
    id_token: Option<&str>,
) -> Result<VerifiedIdentity, ApiFailure> {
    let Some(id_token) = id_token.map(str::trim).filter(|t| !t.is_empty()) else {
        warn!("session request without idToken");
        return Err(failure(StatusCode::BAD_REQUEST, "Missing idToken"));
    };
    let identity = ctx
        .verifier
        .verify(id_token)
        .await
        .map_err(|e| {
            warn!(error = %e, "id token rejected");
            verification_failure(&e, ctx.expose_error_details)
        })?;
    info!(uid = %identity.uid, "id token verified");
    Ok(identity)
}

fn provider_failure(ctx: &ApiContext, err: IdentityError) -> ApiFailure {
    match err {
        IdentityError::Provider { code, .. } => {
            let status = match code {
                "auth/too-many-requests" => StatusCode::TOO_MANY_REQUESTS,
                "auth/email-already-in-use" | "auth/account-exists-with-different-credential" => {
                    StatusCode::CONFLICT
                }
                "auth/weak-password" | "auth/invalid-email" => StatusCode::BAD_REQUEST,
                "auth/user-disabled" => StatusCode::FORBIDDEN,
                "auth/internal-error" => StatusCode::BAD_GATEWAY,
                _ => StatusCode::UNAUTHORIZED,
            };
            (
                status,
                Json(ApiError::with_details(
                    message_for_code(code),
                    json!({ "code": code }),
                )),
            )
        }
        e if e.is_configuration() => verification_failure(&e, ctx.expose_error_details),
        e => {
            warn!(error = %e, "identity provider unreachable");
            failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "Authentication service unavailable. Please try again later",
            )
        }
    }
}

pub async fn sign_in_with_password(
    ctx: &ApiContext,
    req: &LoginRequest,
) -> Result<SignInResult, ApiFailure> {
    validate_login(req).map_err(|msg| failure(StatusCode::BAD_REQUEST, msg))?;
    ctx.credentials
        .sign_in_with_password(req.email.trim(), &req.password)
        .await
        .map_err(|e| provider_failure(ctx, e))
}

pub async fn register(
    ctx: &ApiContext,
    req: &RegisterRequest,
) -> Result<SignInResult, ApiFailure> {
    if let Err(errors) = validate_registration(req) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::with_details("Validation failed", json!(errors))),
        ));
    }
    let display_name = req.display_name();
    let created = ctx
        .credentials
        .sign_up(req.email.trim(), &req.password, Some(display_name.as_str()))
        .await
        .map_err(|e| provider_failure(ctx, e))?;
    info!(uid = %created.local_id, "account registered");
    Ok(created)
}

pub async fn sign_in_with_oauth(
    ctx: &ApiContext,
    req: &OAuthRequest,
) -> Result<SignInResult, ApiFailure> {
    let token = req.provider_id_token.trim();
    if token.is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "Missing providerIdToken"));
    }
    let provider = req
        .provider_id
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_OAUTH_PROVIDER);
    ctx.credentials
        .sign_in_with_idp(provider, token)
        .await
        .map_err(|e| provider_failure(ctx, e))
}

fn upload_rejection(rejection: UploadRejection) -> ApiFailure {
    match rejection {
        UploadRejection::UnsupportedType => failure(
            StatusCode::BAD_REQUEST,
            "Invalid file type. Please upload JPEG or PNG images only.",
        ),
        UploadRejection::TooLarge => failure(
            StatusCode::BAD_REQUEST,
            "File too large. Maximum size is 10MB.",
        ),
    }
}

/// Pulls the `image` part out of a multipart body and applies the upload rules.
pub async fn read_image_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ImageUpload, ApiFailure> {
    let no_file = || failure(StatusCode::BAD_REQUEST, "No file uploaded");
    let mut multipart = multipart.map_err(|_| no_file())?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(no_file()),
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(upload_rejection(UploadRejection::TooLarge))
            }
            Err(e) => return Err(failure(StatusCode::BAD_REQUEST, e.body_text())),
        };
        if field.name() != Some("image") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("upload")
            .to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !is_allowed_image_type(&content_type) {
            return Err(upload_rejection(UploadRejection::UnsupportedType));
        }

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(upload_rejection(UploadRejection::TooLarge))
            }
            Err(e) => return Err(failure(StatusCode::BAD_REQUEST, e.body_text())),
        };
        if bytes.is_empty() {
            return Err(no_file());
        }
        check_upload(&content_type, bytes.len()).map_err(upload_rejection)?;

        return Ok(ImageUpload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
}

fn upstream_failure(ctx: &ApiContext, err: InferenceError, failed: &str) -> ApiFailure {
    match err {
        InferenceError::Upstream { status, reason, .. } => (
            StatusCode::BAD_GATEWAY,
            Json(ApiError::with_details(
                failed,
                format!("Inference API returned {status}: {reason}"),
            )),
        ),
        InferenceError::Unavailable(detail) => {
            warn!(%detail, "inference service unavailable");
            failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "AI service is currently unavailable. Please try again later.",
            )
        }
        InferenceError::Timeout => failure(
            StatusCode::REQUEST_TIMEOUT,
            "Request timeout. Please try again.",
        ),
        e => internal(ctx, e),
    }
}

/// Forwards the image, stamps gateway metadata and records the result.
pub async fn analyze_image(
    ctx: &ApiContext,
    uid: &Uid,
    image: ImageUpload,
) -> Result<AnalysisResult, ApiFailure> {
    info!(
        %uid,
        filename = %image.filename,
        size = image.bytes.len(),
        content_type = %image.content_type,
        "processing upload"
    );
    let filename = image.filename.clone();
    let filesize = image.bytes.len();
    let filetype = image.content_type.clone();

    let mut result = ctx
        .inference
        .predict(image)
        .await
        .map_err(|e| upstream_failure(ctx, e, "AI model processing failed"))?;

    let mut metadata = Map::new();
    metadata.insert("filename".into(), Value::from(filename.clone()));
    metadata.insert("filesize".into(), Value::from(filesize));
    metadata.insert("filetype".into(), Value::from(filetype));
    metadata.insert("processed_at".into(), Value::from(now_rfc3339()));
    metadata.insert("api_version".into(), Value::from(GATEWAY_API_VERSION));
    result.merge_metadata(metadata);

    match ctx.storage.record_analysis(uid, &filename, &result).await {
        Ok(analysis_id) => result.analysis_id = Some(analysis_id),
        Err(e) => error!(%uid, error = %e, "failed to record analysis history"),
    }

    info!(
        %uid,
        total_stones = result.summary.total_stones,
        risk_level = %result.risk_level(),
        "analysis complete"
    );
    Ok(result)
}

pub async fn inference_health(ctx: &ApiContext) -> HealthReport {
    let timestamp = now_rfc3339();
    match ctx.inference.health().await {
        Ok(healthy) => HealthReport {
            status: "healthy".into(),
            timestamp,
            services: HealthServices {
                gateway: "healthy".into(),
                inference_api: if healthy { "healthy" } else { "unhealthy" }.into(),
                inference_url: Some(ctx.inference.base_url().to_string()),
                error: None,
            },
        },
        Err(e) => HealthReport {
            status: "partial".into(),
            timestamp,
            services: HealthServices {
                gateway: "healthy".into(),
                inference_api: "unreachable".into(),
                inference_url: None,
                error: Some(e.to_string()),
            },
        },
    }
}

pub async fn render_report(
    ctx: &ApiContext,
    result: &AnalysisResult,
) -> Result<Vec<u8>, ApiFailure> {
    let report = ReportRequest::from_result(result, &now_rfc3339());
    ctx.inference
        .generate_report(&report)
        .await
        .map_err(|e| upstream_failure(ctx, e, "Report generation failed"))
}

pub async fn ask_chatbot(ctx: &ApiContext, req: &ChatRequest) -> Result<ChatResponse, ApiFailure> {
    if req.question.trim().is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "Question is required"));
    }
    ctx.inference.chat(req).await.map_err(|e| {
        warn!(error = %e, "chat relay failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(ApiError::with_details(CHAT_FALLBACK, e.to_string())),
        )
    })
}

pub async fn list_history(
    ctx: &ApiContext,
    uid: &Uid,
    limit: Option<u32>,
) -> Result<Vec<AnalysisSummary>, ApiFailure> {
    let limit = limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .clamp(1, HISTORY_MAX_LIMIT);
    ctx.storage
        .list_analyses(uid, limit)
        .await
        .map_err(|e| internal(ctx, e))
}

pub async fn load_history(
    ctx: &ApiContext,
    uid: &Uid,
    analysis_id: AnalysisId,
) -> Result<AnalysisResult, ApiFailure> {
    ctx.storage
        .load_analysis(uid, analysis_id)
        .await
        .map_err(|e| internal(ctx, e))?
        .map(|stored| stored.result)
        .ok_or_else(analysis_not_found)
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
