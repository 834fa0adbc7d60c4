use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use identity::{
    CredentialProvider, FirebaseTokenVerifier, IdentityToolkitClient, TokenVerifier,
    UnconfiguredProvider, UnconfiguredVerifier,
};
use inference::HttpInferenceClient;
use serde::Deserialize;
use shared::{
    domain::{AnalysisId, AnalysisResult},
    protocol::{
        AnalysisSummary, ChatRequest, ChatResponse, HealthReport, LoginRequest, OAuthRequest,
        RegisterRequest, SessionRequest, SessionResponse,
    },
    validation::MAX_UPLOAD_BYTES,
};
use storage::Storage;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

mod api;
mod app_state;
mod config;
mod session;
#[cfg(test)]
mod test_support;

use api::{ApiContext, ApiFailure};
use app_state::AppState;
use config::{load_settings, normalize_database_url, Settings};
use session::{cleared_session_cookie, session_cookie, set_cookie_headers, SessionUser};

/// Multipart framing on top of the largest accepted image.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let settings = load_settings()?;
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let api = build_api_context(&settings, storage)?;
    let state = AppState {
        api,
        secure_cookies: settings.is_production(),
    };
    let app = build_router(Arc::new(state), settings.cors_allow_origin.as_deref());

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, inference_url = %settings.inference_url, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_api_context(settings: &Settings, storage: Storage) -> anyhow::Result<ApiContext> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let verifier: Arc<dyn TokenVerifier> = match &settings.firebase_project_id {
        Some(project_id) => Arc::new(FirebaseTokenVerifier::new(project_id.clone(), http.clone())),
        None => Arc::new(UnconfiguredVerifier),
    };
    let credentials: Arc<dyn CredentialProvider> = match &settings.firebase_api_key {
        Some(api_key) => Arc::new(IdentityToolkitClient::new(http, api_key.clone())),
        None => Arc::new(UnconfiguredProvider),
    };
    let inference = HttpInferenceClient::new(
        settings.inference_url.clone(),
        Duration::from_secs(settings.inference_timeout_seconds),
    )?;

    Ok(ApiContext {
        storage,
        verifier,
        credentials,
        inference: Arc::new(inference),
        expose_error_details: !settings.is_production(),
    })
}

fn build_router(state: Arc<AppState>, cors_allow_origin: Option<&str>) -> Router {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/auth/session",
            post(create_session).delete(delete_session),
        )
        .route("/api/auth/register", post(http_register))
        .route("/api/auth/login", post(http_login))
        .route("/api/auth/oauth", post(http_oauth))
        .route("/api/detect", post(http_detect).get(http_detect_health))
        .route("/api/report", post(http_report))
        .route("/api/chat", post(http_chat))
        .route("/api/results", get(http_list_results))
        .route("/api/results/:analysis_id", get(http_load_result))
        .layer(DefaultBodyLimit::max(
            MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(TraceLayer::new_for_http());

    let router = match cors_allow_origin.and_then(|origin| HeaderValue::from_str(origin).ok()) {
        Some(origin) => router.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE])
                .allow_credentials(true),
        ),
        None => router,
    };

    router.with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            warn!(error = %e, "storage health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

/// Verifies a freshly issued ID token and hands it back as the session cookie.
async fn establish_session(
    state: &AppState,
    id_token: &str,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiFailure> {
    let identity = api::verify_id_token(&state.api, Some(id_token)).await?;
    let headers = set_cookie_headers(&session_cookie(id_token.trim(), state.secure_cookies));
    Ok((
        headers,
        Json(SessionResponse {
            ok: true,
            uid: Some(identity.uid.0),
            email: identity.email,
        }),
    ))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SessionRequest>>,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiFailure> {
    let id_token = body.and_then(|Json(req)| req.id_token).unwrap_or_default();
    establish_session(&state, &id_token).await
}

async fn delete_session() -> (HeaderMap, Json<SessionResponse>) {
    (
        set_cookie_headers(&cleared_session_cookie()),
        Json(SessionResponse {
            ok: true,
            uid: None,
            email: None,
        }),
    )
}

async fn http_register(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RegisterRequest>>,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiFailure> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let created = api::register(&state.api, &req).await?;
    establish_session(&state, &created.id_token).await
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    body: Option<Json<LoginRequest>>,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiFailure> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let signed_in = api::sign_in_with_password(&state.api, &req).await?;
    establish_session(&state, &signed_in.id_token).await
}

async fn http_oauth(
    State(state): State<Arc<AppState>>,
    body: Option<Json<OAuthRequest>>,
) -> Result<(HeaderMap, Json<SessionResponse>), ApiFailure> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let signed_in = api::sign_in_with_oauth(&state.api, &req).await?;
    establish_session(&state, &signed_in.id_token).await
}

async fn http_detect(
    State(state): State<Arc<AppState>>,
    SessionUser(identity): SessionUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResult>, ApiFailure> {
    let image = api::read_image_upload(multipart).await?;
    let result = api::analyze_image(&state.api, &identity.uid, image).await?;
    Ok(Json(result))
}

async fn http_detect_health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(api::inference_health(&state.api).await)
}

async fn http_report(
    State(state): State<Arc<AppState>>,
    SessionUser(identity): SessionUser,
    body: Result<Json<AnalysisResult>, JsonRejection>,
) -> Result<impl IntoResponse, ApiFailure> {
    let Json(result) = body.map_err(api::malformed_body)?;
    let pdf = api::render_report(&state.api, &result).await?;
    info!(uid = %identity.uid, bytes = pdf.len(), "report generated");

    let filename = format!(
        "kidney_scan_report_{}.pdf",
        Utc::now().timestamp_millis()
    );
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok((headers, pdf))
}

async fn http_chat(
    State(state): State<Arc<AppState>>,
    SessionUser(identity): SessionUser,
    body: Option<Json<ChatRequest>>,
) -> Result<Json<ChatResponse>, ApiFailure> {
    let req = body.map(|Json(req)| req).unwrap_or(ChatRequest {
        question: String::new(),
        stones_data: Vec::new(),
    });
    info!(uid = %identity.uid, stones = req.stones_data.len(), "chat question");
    Ok(Json(api::ask_chatbot(&state.api, &req).await?))
}

async fn http_list_results(
    State(state): State<Arc<AppState>>,
    SessionUser(identity): SessionUser,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<AnalysisSummary>>, ApiFailure> {
    let Query(q) = query.map_err(api::malformed_query)?;
    Ok(Json(
        api::list_history(&state.api, &identity.uid, q.limit).await?,
    ))
}

async fn http_load_result(
    State(state): State<Arc<AppState>>,
    SessionUser(identity): SessionUser,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<AnalysisResult>, ApiFailure> {
    // Ids are integers; anything else cannot name a stored analysis.
    let Path(analysis_id) = path.map_err(|_| api::analysis_not_found())?;
    Ok(Json(
        api::load_history(&state.api, &identity.uid, AnalysisId(analysis_id)).await?,
    ))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
