use super::*;
use axum::{
    extract::Multipart,
    http::{header, StatusCode as AxumStatus},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::domain::ChatStone;
use tokio::net::TcpListener;

async fn predict(mut multipart: Multipart) -> impl IntoResponse {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default();
        if filename == "broken.png" {
            return (
                AxumStatus::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "model crashed" })),
            );
        }
        return (
            AxumStatus::OK,
            Json(json!({
                "detections": [{
                    "id": 1,
                    "bbox": [1.0, 2.0, 3.0, 4.0],
                    "confidence": 0.85,
                    "diameter_px": 12.0,
                    "diameter_mm": 6.0,
                    "type": "kidney_stone"
                }],
                "summary": {
                    "total_stones": 1,
                    "largest_stone_mm": 6.0,
                    "average_confidence": 0.85,
                    "risk_level": "moderate"
                },
                "recommendations": ["Drink plenty of water (2-3 liters daily)"],
                "metadata": {
                    "seen_filename": filename,
                    "seen_type": content_type,
                    "seen_size": bytes.len()
                },
                "analysis_timestamp": "2026-01-01T00:00:00"
            })),
        );
    }
    (
        AxumStatus::BAD_REQUEST,
        Json(json!({ "error": "Missing file 'image'" })),
    )
}

async fn report(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
    let marker = format!("%PDF-1.4 stones={}", body["detections"].as_array().map_or(0, Vec::len));
    ([(header::CONTENT_TYPE, "application/pdf")], marker)
}

async fn chat(Json(body): Json<ChatRequest>) -> Json<ChatResponse> {
    Json(ChatResponse {
        response: format!("{} ({} stones)", body.question, body.stones_data.len()),
    })
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn spawn_upstream() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/predict", post(predict))
        .route("/generate-report", post(report))
        .route("/chat", post(chat))
        .route("/health", get(|| async { "ok" }))
        .route("/slow/chat", post(slow));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn png(filename: &str) -> ImageUpload {
    ImageUpload {
        filename: filename.to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
    }
}

#[tokio::test]
async fn predict_sends_image_part_with_name_and_type() {
    let base = spawn_upstream().await;
    let client = HttpInferenceClient::new(format!("{base}/"), Duration::from_secs(5)).expect("client");
    let result = client.predict(png("scan.png")).await.expect("predict");
    assert_eq!(result.summary.total_stones, 1);
    assert_eq!(result.metadata["seen_filename"], "scan.png");
    assert_eq!(result.metadata["seen_type"], "image/png");
    assert_eq!(result.metadata["seen_size"], 7);
}

#[tokio::test]
async fn upstream_failure_carries_status_and_reason() {
    let base = spawn_upstream().await;
    let client = HttpInferenceClient::new(base, Duration::from_secs(5)).expect("client");
    let err = client.predict(png("broken.png")).await.expect_err("500");
    match err {
        InferenceError::Upstream { status, ref reason, ref body } => {
            assert_eq!(status, 500);
            assert_eq!(reason, "Internal Server Error");
            assert!(body.contains("model crashed"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err.to_string(),
        "Inference API returned 500: Internal Server Error"
    );
}

#[tokio::test]
async fn report_returns_pdf_bytes() {
    let base = spawn_upstream().await;
    let client = HttpInferenceClient::new(base, Duration::from_secs(5)).expect("client");
    let result = AnalysisResult::default();
    let pdf = client
        .generate_report(&ReportRequest::from_result(&result, "now"))
        .await
        .expect("report");
    assert!(pdf.starts_with(b"%PDF"));
}

#[tokio::test]
async fn chat_round_trip() {
    let base = spawn_upstream().await;
    let client = HttpInferenceClient::new(base, Duration::from_secs(5)).expect("client");
    let reply = client
        .chat(&ChatRequest {
            question: "Should I drink more water?".into(),
            stones_data: vec![ChatStone {
                id: 1,
                diameter_mm: "6 mm".into(),
                position: "left".into(),
                confidence: "85.0%".into(),
                kind: "kidney_stone".into(),
            }],
        })
        .await
        .expect("chat");
    assert_eq!(reply.response, "Should I drink more water? (1 stones)");
}

#[tokio::test]
async fn health_reflects_status() {
    let base = spawn_upstream().await;
    let client = HttpInferenceClient::new(base, Duration::from_secs(5)).expect("client");
    assert!(client.health().await.expect("health"));
}

#[tokio::test]
async fn refused_connection_is_unavailable() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client =
        HttpInferenceClient::new(format!("http://{addr}"), Duration::from_secs(5)).expect("client");
    let err = client.health().await.expect_err("refused");
    assert!(matches!(err, InferenceError::Unavailable(_)), "got {err}");
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let base = spawn_upstream().await;
    let client = HttpInferenceClient::new(format!("{base}/slow"), Duration::from_millis(200))
        .expect("client");
    let err = client
        .chat(&ChatRequest {
            question: "hello".into(),
            stones_data: Vec::new(),
        })
        .await
        .expect_err("timeout");
    assert!(matches!(err, InferenceError::Timeout), "got {err}");
}
