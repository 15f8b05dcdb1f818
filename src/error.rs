use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::features::normalize::NormalizeError;

/// 应用统一错误类型
///
/// `Display` 即对外返回的 `detail`，上游/内部细节只写日志。
#[derive(Error, Debug, utoipa::ToSchema)]
pub enum AppError {
    /// 上传文件校验失败
    #[error("{0}")]
    Normalize(#[from] NormalizeError),

    /// 参数校验错误
    #[error("{0}")]
    Validation(String),

    /// 请求体超过上限
    #[error("{0}")]
    PayloadTooLarge(String),

    /// 图片生成/编辑失败
    #[error("Error while generating image.")]
    Generation,

    /// 上游接口（模型列表等）失败
    #[error("{0}")]
    Upstream(String),

    /// 内部服务器错误
    #[error("{0}")]
    Internal(String),
}

/// RFC7807 风格的错误响应（Problem Details）。
///
/// `message` 与 `detail` 相同，保留给依赖旧响应字段的调用方。
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    /// 问题类型（URI）。若无更细分的类型，可使用 about:blank。
    #[serde(rename = "type")]
    #[schema(example = "about:blank")]
    pub type_url: String,

    /// 简短标题，用于概括错误。
    #[schema(example = "Bad Request")]
    pub title: String,

    /// HTTP 状态码（与响应 status 一致）。
    #[schema(example = 400)]
    pub status: u16,

    /// 人类可读的详细信息（固定文案）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// 同 detail。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// 稳定的错误码，用于程序化处理。
    #[schema(example = "NOT_AN_IMAGE")]
    pub code: String,

    /// 请求追踪 ID（与响应头 `x-request-id` 一致）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Normalize(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Generation => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn stable_code(&self) -> &'static str {
        match self {
            AppError::Normalize(e) => e.stable_code(),
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::Generation => "GENERATION_FAILED",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::PAYLOAD_TOO_LARGE => "Payload Too Large",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();

        let problem = ProblemDetails {
            type_url: "about:blank".to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            message: Some(detail.clone()),
            detail: Some(detail),
            code: self.stable_code().to_string(),
            request_id: crate::request_id::current_request_id(),
        };

        let mut res = Json(problem).into_response();
        *res.status_mut() = status;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        res
    }
}
