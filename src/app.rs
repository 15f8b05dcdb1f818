use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::compression::CompressionLayer;

use crate::config::AppConfig;
use crate::cors::build_cors_layer;
use crate::features::{generation, health};
use crate::openapi::create_openapi_router;
use crate::request_id::request_id_middleware;
use crate::state::AppState;

/// 压缩策略：明确排除不该压缩的响应。
///
/// 生成结果是 PNG 图片，压缩只会浪费 CPU；JSON（模型列表、OpenAPI 文档、错误）照常压缩。
pub fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

/// 组装完整路由（含中间件），供 main 与集成测试共用。
pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    let mut app = Router::<AppState>::new()
        .merge(health::create_health_router())
        .merge(generation::create_generation_router())
        .merge(create_openapi_router())
        .layer(DefaultBodyLimit::max(config.upload.max_bytes))
        .with_state(state);

    app = app.layer(CompressionLayer::new().compress_when(compression_predicate()));

    if let Some(cors) = build_cors_layer(&config.cors) {
        app = app.layer(cors);
    }

    // 最外层：保证所有响应（含中间件拒绝）都带 request_id
    app.layer(axum::middleware::from_fn(request_id_middleware))
}

#[cfg(test)]
mod tests {
    use super::compression_predicate;
    use axum::body::Body;
    use axum::http::{Response as HttpResponse, header};
    use tower_http::compression::predicate::Predicate;

    fn should_compress_for(ct: &str) -> bool {
        // 命中 SizeAbove（默认 32B），避免因为 body 太小导致测试不稳定。
        let body_bytes = vec![b'x'; 2048];
        let resp = HttpResponse::builder()
            .header(header::CONTENT_TYPE, ct)
            .body(Body::from(body_bytes))
            .unwrap();
        compression_predicate().should_compress(&resp)
    }

    #[test]
    fn generated_images_are_not_compressed() {
        assert!(!should_compress_for("image/png"));
        assert!(!should_compress_for("image/webp"));
        assert!(!should_compress_for("application/octet-stream"));
    }

    #[test]
    fn json_and_problem_details_are_compressed() {
        assert!(should_compress_for("application/json"));
        assert!(should_compress_for("application/problem+json"));
    }
}
