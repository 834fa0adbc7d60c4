use super::*;
use axum::{
    extract::Multipart,
    http::{HeaderMap, StatusCode as AxumStatus},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::domain::{Detection, Summary};
use tokio::net::TcpListener;

const TOKEN: &str = "header.payload.signature";

fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|cookie| cookie.contains(&format!("fb_token={TOKEN}")))
}

fn not_authenticated() -> (AxumStatus, Json<ApiError>) {
    (AxumStatus::UNAUTHORIZED, Json(ApiError::new("Not authenticated")))
}

fn sample_result() -> AnalysisResult {
    AnalysisResult {
        detections: vec![Detection {
            id: 1,
            bbox: [0.0, 0.0, 10.0, 10.0],
            confidence: Some(0.875),
            diameter_px: 10.0,
            diameter_mm: 4.2,
            position: None,
            kind: "kidney_stone".into(),
        }],
        summary: Summary {
            total_stones: 1,
            largest_stone_mm: 4.2,
            ..Summary::default()
        },
        ..AnalysisResult::default()
    }
}

async fn login(Json(req): Json<LoginRequest>) -> impl IntoResponse {
    if req.email == "alice@example.com" && req.password == "secret123" {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::SET_COOKIE,
            format!("fb_token={TOKEN}; Path=/; Max-Age=432000; HttpOnly; SameSite=Lax")
                .parse()
                .expect("cookie"),
        );
        (
            headers,
            Json(SessionResponse {
                ok: true,
                uid: Some("alice".into()),
                email: Some(req.email),
            }),
        )
            .into_response()
    } else {
        (
            AxumStatus::UNAUTHORIZED,
            Json(ApiError::with_details(
                "Invalid email or password",
                json!({ "code": "auth/invalid-credential" }),
            )),
        )
            .into_response()
    }
}

async fn logout() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        "fb_token=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"
            .parse()
            .expect("cookie"),
    );
    (headers, Json(json!({ "ok": true })))
}

async fn detect(headers: HeaderMap, mut multipart: Multipart) -> impl IntoResponse {
    if !has_session(&headers) {
        return not_authenticated().into_response();
    }
    let Some(field) = multipart.next_field().await.expect("field") else {
        return (AxumStatus::BAD_REQUEST, Json(ApiError::new("No file uploaded"))).into_response();
    };
    let name = field.name().unwrap_or_default().to_string();
    let filename = field.file_name().unwrap_or_default().to_string();
    let filetype = field.content_type().unwrap_or_default().to_string();
    let size = field.bytes().await.expect("bytes").len();

    let mut result = sample_result();
    result.metadata.insert("field".into(), json!(name));
    result.metadata.insert("filename".into(), json!(filename));
    result.metadata.insert("filetype".into(), json!(filetype));
    result.metadata.insert("filesize".into(), json!(size));
    result.analysis_id = Some(AnalysisId(7));
    Json(result).into_response()
}

async fn report(headers: HeaderMap, Json(_result): Json<AnalysisResult>) -> impl IntoResponse {
    if !has_session(&headers) {
        return not_authenticated().into_response();
    }
    (
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"kidney_scan_report_1700000000000.pdf\"",
            ),
        ],
        b"%PDF-1.4".to_vec(),
    )
        .into_response()
}

async fn chat(headers: HeaderMap, Json(req): Json<ChatRequest>) -> impl IntoResponse {
    if !has_session(&headers) {
        return not_authenticated().into_response();
    }
    let stone = req.stones_data.first().map(|s| s.confidence.clone());
    Json(ChatResponse {
        response: format!("{} / {:?}", req.question, stone),
    })
    .into_response()
}

async fn results(headers: HeaderMap) -> impl IntoResponse {
    if !has_session(&headers) {
        return not_authenticated().into_response();
    }
    Json(vec![AnalysisSummary {
        analysis_id: AnalysisId(7),
        filename: "scan.png".into(),
        created_at: "2026-10-17T08:00:00Z".into(),
        total_stones: 1,
        risk_level: "low".into(),
    }])
    .into_response()
}

async fn health() -> Json<HealthReport> {
    Json(HealthReport {
        status: "partial".into(),
        timestamp: "2026-10-17T08:00:00Z".into(),
        services: shared::protocol::HealthServices {
            gateway: "healthy".into(),
            inference_api: "unreachable".into(),
            inference_url: None,
            error: Some("connection refused".into()),
        },
    })
}

async fn spawn_gateway() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/session", axum::routing::delete(logout))
        .route("/api/detect", post(detect).get(health))
        .route("/api/report", post(report))
        .route("/api/chat", post(chat))
        .route("/api/results", get(results))
        .route(
            "/api/results/:id",
            get(|| async { (AxumStatus::PAYLOAD_TOO_LARGE, "length limit exceeded") }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn png(bytes: usize) -> ScanUpload {
    ScanUpload {
        filename: "scan.png".into(),
        content_type: "image/png".into(),
        bytes: vec![7; bytes],
    }
}

#[test]
fn upload_type_is_guessed_from_extension() {
    let upload = ScanUpload::from_path(Path::new("/tmp/Scan.JPG"), vec![1]);
    assert_eq!(upload.filename, "Scan.JPG");
    assert_eq!(upload.content_type, "image/jpeg");
    assert!(upload.validate().is_ok());

    let gif = ScanUpload::from_path(Path::new("anim.gif"), vec![1]);
    assert!(matches!(gif.validate(), Err(ClientError::InvalidUpload(_))));
}

#[test]
fn oversized_and_empty_uploads_are_rejected_locally() {
    let err = png(10 * 1024 * 1024 + 1).validate().expect_err("too large");
    assert_eq!(err.to_string(), "File too large. Maximum size is 10MB");
    assert!(png(0).validate().is_err());
}

#[test]
fn rejects_non_http_server_url() {
    assert!(GatewayClient::new("ftp://example.com").is_err());
    assert!(GatewayClient::new("not a url").is_err());
    let client = GatewayClient::new("http://localhost:3000/").expect("client");
    assert_eq!(client.server_url(), "http://localhost:3000");
}

#[test]
fn parses_attachment_filename() {
    assert_eq!(
        attachment_filename("attachment; filename=\"report.pdf\"").as_deref(),
        Some("report.pdf")
    );
    assert!(attachment_filename("inline").is_none());
}

#[tokio::test]
async fn protected_calls_require_a_session() {
    let client = GatewayClient::new("http://127.0.0.1:9").expect("client");
    let err = client.results(None).await.expect_err("should fail");
    assert!(matches!(err, ClientError::NotSignedIn));
    assert!(err.is_session_expired());
}

#[tokio::test]
async fn login_captures_cookie_and_unlocks_protected_routes() {
    let url = spawn_gateway().await;
    let mut client = GatewayClient::new(&url).expect("client");

    let err = client
        .login("alice@example.com", "wrong")
        .await
        .expect_err("should fail");
    assert_eq!(err.status(), Some(401));
    assert_eq!(err.to_string(), "Invalid email or password (HTTP 401)");
    assert!(!client.is_signed_in());

    let session = client
        .login("alice@example.com", "secret123")
        .await
        .expect("login");
    assert_eq!(session.uid.as_deref(), Some("alice"));
    assert_eq!(client.session_token(), Some(TOKEN));

    let history = client.results(Some(5)).await.expect("results");
    assert_eq!(history[0].analysis_id, AnalysisId(7));

    client.logout().await.expect("logout");
    assert!(!client.is_signed_in());
}

#[tokio::test]
async fn stale_session_reports_expiry() {
    let url = spawn_gateway().await;
    let client = GatewayClient::new(&url)
        .expect("client")
        .with_session(Some("old-token".into()));
    let err = client.results(None).await.expect_err("should fail");
    assert!(err.is_session_expired());
}

#[tokio::test]
async fn detect_sends_image_part() {
    let url = spawn_gateway().await;
    let client = GatewayClient::new(&url)
        .expect("client")
        .with_session(Some(TOKEN.into()));
    let result = client.detect(&png(32)).await.expect("detect");
    assert_eq!(result.metadata["field"], json!("image"));
    assert_eq!(result.metadata["filename"], json!("scan.png"));
    assert_eq!(result.metadata["filetype"], json!("image/png"));
    assert_eq!(result.metadata["filesize"], json!(32));
    assert_eq!(result.analysis_id, Some(AnalysisId(7)));
}

#[tokio::test]
async fn report_and_chat_round_trip() {
    let url = spawn_gateway().await;
    let client = GatewayClient::new(&url)
        .expect("client")
        .with_session(Some(TOKEN.into()));
    let result = sample_result();

    let report = client.report(&result).await.expect("report");
    assert_eq!(report.filename, "kidney_scan_report_1700000000000.pdf");
    assert_eq!(report.bytes, b"%PDF-1.4");

    let answer = client
        .ask("Is it serious?", Some(&result))
        .await
        .expect("chat");
    assert_eq!(answer.response, "Is it serious? / Some(\"87.5%\")");
}

#[tokio::test]
async fn plain_text_errors_are_wrapped() {
    let url = spawn_gateway().await;
    let client = GatewayClient::new(&url)
        .expect("client")
        .with_session(Some(TOKEN.into()));
    let err = client.result(AnalysisId(1)).await.expect_err("should fail");
    match err {
        ClientError::Rejected { status, body } => {
            assert_eq!(status, 413);
            assert_eq!(body.error, "length limit exceeded");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn health_is_public() {
    let url = spawn_gateway().await;
    let client = GatewayClient::new(&url).expect("client");
    let report = client.detect_health().await.expect("health");
    assert_eq!(report.status, "partial");
    assert_eq!(report.services.inference_api, "unreachable");
}
