use axum::{Json, Router, routing::get};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::generation::handler::generate_image,
        crate::features::generation::handler::edit_image,
        crate::features::generation::handler::list_models,
    ),
    components(
        schemas(
            crate::error::AppError,
            crate::error::ProblemDetails,
            crate::features::normalize::NormalizeError,
            crate::features::normalize::AllowedFormat,
            crate::features::generation::models::PromptRequest,
            crate::features::generation::models::Model,
            crate::features::generation::handler::EditImageForm,
            crate::features::health::handler::HealthResponse,
        )
    ),
    tags(
        (
            name = "Generation",
            description = "图片生成：文生图、图生图（上传图片自动规范化为 png/jpeg/webp）、模型列表。"
        ),
        (name = "Health", description = "健康检查：服务探活。"),
    ),
    info(
        title = "Image Gen Backend API",
        version = env!("CARGO_PKG_VERSION"),
        description = "基于 Google 生成式 API 的图片生成服务（Axum + utoipa）。错误统一返回 application/problem+json。"
    )
)]
pub struct ApiDoc;

/// `/api-docs/openapi.json`
pub fn create_openapi_router() -> Router<AppState> {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
