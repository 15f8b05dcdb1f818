mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;

use common::{
    MockMode, build_app, edit_image_request, generate_image_request, header_str, problem, send,
    start_mock_google, test_config,
};

#[tokio::test]
async fn health_reports_service_and_version() {
    let mock = start_mock_google(MockMode::Image).await;
    let app = build_app(&test_config(&mock));

    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let (status, _, body) = send(app, req).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "image-gen-backend");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn openapi_document_lists_all_routes() {
    let mock = start_mock_google(MockMode::Image).await;
    let app = build_app(&test_config(&mock));

    let req = Request::builder()
        .uri("/api-docs/openapi.json")
        .body(Body::empty())
        .expect("build request");
    let (status, _, body) = send(app, req).await;

    assert_eq!(status, StatusCode::OK);
    let doc: serde_json::Value = serde_json::from_slice(&body).expect("json");
    let paths = doc["paths"].as_object().expect("paths");
    for path in ["/health", "/generate-image", "/edit-image", "/models"] {
        assert!(paths.contains_key(path), "missing {path}");
    }
    assert!(doc["paths"]["/edit-image"]["post"]["requestBody"]["content"]
        .get("multipart/form-data")
        .is_some());
    assert!(doc["components"]["schemas"].get("ProblemDetails").is_some());
}

#[tokio::test]
async fn request_id_is_generated_when_missing() {
    let mock = start_mock_google(MockMode::Image).await;
    let app = build_app(&test_config(&mock));

    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let (_, headers, _) = send(app, req).await;

    let request_id = header_str(&headers, "x-request-id");
    assert!(request_id.starts_with("req_"), "got {request_id:?}");
}

#[tokio::test]
async fn problem_details_echo_client_request_id() {
    let mock = start_mock_google(MockMode::Image).await;
    let app = build_app(&test_config(&mock));

    let mut req = edit_image_request(Some("a prompt"), None);
    req.headers_mut()
        .insert("x-request-id", "client.req-001".parse().expect("header"));
    let (status, headers, body) = send(app, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(header_str(&headers, "x-request-id"), "client.req-001");
    let json = problem(&body);
    assert_eq!(json["requestId"], "client.req-001");
    assert_eq!(json["status"], 400);
    assert_eq!(json["title"], "Bad Request");
    assert_eq!(json["type"], "about:blank");
}

#[tokio::test]
async fn unsafe_client_request_id_is_replaced() {
    let mock = start_mock_google(MockMode::Image).await;
    let app = build_app(&test_config(&mock));

    let mut req = generate_image_request(json!({ "prompt": 1 }));
    req.headers_mut()
        .insert("x-request-id", "bad/id".parse().expect("header"));
    let (_, headers, body) = send(app, req).await;

    let request_id = header_str(&headers, "x-request-id").to_string();
    assert_ne!(request_id, "bad/id");
    assert_eq!(problem(&body)["requestId"], request_id.as_str());
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let mock = start_mock_google(MockMode::Image).await;
    let mut cfg = test_config(&mock);
    cfg.cors.enabled = true;
    cfg.cors.allowed_origins = vec!["https://studio.example.com".to_string()];
    let app = build_app(&cfg);

    let req = Request::builder()
        .method("OPTIONS")
        .uri("/edit-image")
        .header(header::ORIGIN, "https://studio.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .expect("build request");
    let (_, headers, _) = send(app.clone(), req).await;

    assert_eq!(
        header_str(&headers, "access-control-allow-origin"),
        "https://studio.example.com"
    );
    assert!(header_str(&headers, "access-control-allow-methods").contains("POST"));

    // 浏览器需要读取文件名与 request_id
    let req = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://studio.example.com")
        .body(Body::empty())
        .expect("build request");
    let (_, headers, _) = send(app, req).await;
    let exposed = header_str(&headers, "access-control-expose-headers").to_ascii_lowercase();
    assert!(exposed.contains("content-disposition"), "got {exposed:?}");
    assert!(exposed.contains("x-request-id"), "got {exposed:?}");
}

#[tokio::test]
async fn cors_headers_absent_for_unknown_origin() {
    let mock = start_mock_google(MockMode::Image).await;
    let mut cfg = test_config(&mock);
    cfg.cors.enabled = true;
    cfg.cors.allowed_origins = vec!["https://studio.example.com".to_string()];
    let app = build_app(&cfg);

    let req = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://evil.example.com")
        .body(Body::empty())
        .expect("build request");
    let (status, headers, _) = send(app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("access-control-allow-origin").is_none());
}
