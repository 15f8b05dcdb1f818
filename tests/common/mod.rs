#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::{Body, Bytes, to_bytes},
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{Value, json};
use tower::ServiceExt;

use image_gen_backend::app::build_router;
use image_gen_backend::config::AppConfig;
use image_gen_backend::state::AppState;

/// 模拟上游返回的“生成结果”
pub const MOCK_IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nmock-generated-image";

pub const NOT_AN_IMAGE_MSG: &str = "The uploaded file must be an image. Please ensure the image has a .png, .jpeg, or .webp extension.";
pub const CONVERSION_FAILED_MSG: &str = "An error occurred while converting the uploaded image. Please ensure the image has a .png, .jpeg, or .webp extension.";

#[derive(Clone, Copy, Debug)]
pub enum MockMode {
    Image,
    ServerError,
    Blocked,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub action: String,
    pub api_key: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct MockShared {
    mode: MockMode,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    list_hits: Arc<AtomicUsize>,
}

/// 本地模拟的 Google 生成式 API
pub struct MockGoogle {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    list_hits: Arc<AtomicUsize>,
}

impl MockGoogle {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn list_hits(&self) -> usize {
        self.list_hits.load(Ordering::SeqCst)
    }
}

pub async fn start_mock_google(mode: MockMode) -> MockGoogle {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind tcp listener");
    let addr = listener.local_addr().expect("local addr");

    let shared = MockShared {
        mode,
        requests: Arc::new(Mutex::new(Vec::new())),
        list_hits: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/v1beta/models", get(mock_list_models))
        .route("/v1beta/models/:action", post(mock_generate_content))
        .with_state(shared.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockGoogle {
        addr,
        requests: shared.requests,
        list_hits: shared.list_hits,
    }
}

async fn mock_generate_content(
    State(s): State<MockShared>,
    Path(action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    s.requests.lock().expect("lock").push(RecordedRequest {
        action,
        api_key: headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    match s.mode {
        MockMode::Image => Json(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here is your image" },
                    { "inlineData": {
                        "mimeType": "image/png",
                        "data": base64::engine::general_purpose::STANDARD.encode(MOCK_IMAGE)
                    } }
                ] },
                "finishReason": "STOP"
            }]
        }))
        .into_response(),
        MockMode::ServerError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "upstream exploded: secret-detail",
        )
            .into_response(),
        MockMode::Blocked => {
            Json(json!({ "promptFeedback": { "blockReason": "SAFETY" } })).into_response()
        }
    }
}

async fn mock_list_models(State(s): State<MockShared>) -> Response {
    s.list_hits.fetch_add(1, Ordering::SeqCst);
    match s.mode {
        MockMode::ServerError => {
            (StatusCode::SERVICE_UNAVAILABLE, "models backend down").into_response()
        }
        _ => Json(json!({
            "models": [{
                "name": "models/gemini-2.0-flash-preview-image-generation",
                "version": "2.0",
                "displayName": "Gemini 2.0 Flash Preview Image Generation",
                "description": "Image generation preview",
                "inputTokenLimit": 32000,
                "outputTokenLimit": 8192,
                "supportedGenerationMethods": ["generateContent", "countTokens"],
                "temperature": 1.0,
                "topP": 0.95,
                "topK": 40,
                "maxTemperature": 2.0
            }]
        }))
        .into_response(),
    }
}

/// 指向模拟上游的配置
pub fn test_config(mock: &MockGoogle) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.google_ai.api_key = "test-key".to_string();
    cfg.google_ai.model = "test-model".to_string();
    cfg.google_ai.base_url = format!("http://{}/v1beta", mock.addr);
    cfg.google_ai.models_api = format!("http://{}/v1beta/models", mock.addr);
    cfg.google_ai.timeout_secs = 5;
    cfg.upload.max_parallel = 2;
    cfg
}

pub fn build_app(cfg: &AppConfig) -> Router {
    let state = AppState::from_config(cfg).expect("build app state");
    build_router(state, cfg)
}

pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let resp = app.oneshot(req).await.expect("call app");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, headers, body)
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

pub fn problem(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("problem details json")
}

/// 用 `image` crate 编码一张纯色测试图
pub fn encoded_image(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
    let rgba = RgbaImage::from_pixel(width, height, Rgba([200, 40, 90, 255]));
    let img = match format {
        // JPEG 编码器不接受 alpha 通道
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8()),
        _ => DynamicImage::ImageRgba8(rgba),
    };
    let mut cur = Cursor::new(Vec::new());
    img.write_to(&mut cur, format).expect("encode fixture");
    cur.into_inner()
}

/// 伪随机噪声 JPEG：多个编码块，截断点可以落在扫描数据中间
pub fn noisy_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut seed = 0x1234_5678_u32;
    let img = image::RgbImage::from_fn(width, height, |_, _| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let [r, g, b, _] = seed.to_le_bytes();
        image::Rgb([r, g, b])
    });
    let mut cur = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut cur, ImageFormat::Jpeg)
        .expect("encode jpeg");
    cur.into_inner()
}

const BOUNDARY: &str = "----image-gen-backend-test-boundary";

/// 一个 multipart 文件字段
pub struct FilePart<'a> {
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub bytes: &'a [u8],
}

/// 构造 `POST /edit-image` 请求
pub fn edit_image_request(prompt: Option<&str>, file: Option<FilePart<'_>>) -> Request<Body> {
    let mut body = Vec::new();
    if let Some(prompt) = prompt {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"prompt\"\r\n\r\n{prompt}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(file) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.file_name, file.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/edit-image")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("build request")
}

/// 构造 `POST /generate-image` 请求
pub fn generate_image_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate-image")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

/// 上游请求中第一个 inlineData 片段：(mimeType, 解码后的字节)
pub fn sent_inline_image(req: &RecordedRequest) -> (String, Vec<u8>) {
    let parts = req.body["contents"][0]["parts"]
        .as_array()
        .expect("parts array");
    let inline = parts
        .iter()
        .find_map(|p| p.get("inlineData"))
        .expect("inlineData part");
    let mime = inline["mimeType"].as_str().expect("mimeType").to_string();
    let data = base64::engine::general_purpose::STANDARD
        .decode(inline["data"].as_str().expect("data"))
        .expect("valid base64");
    (mime, data)
}
