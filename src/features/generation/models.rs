use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 提示词最短长度（去除首尾空白后，按字符计）
pub const PROMPT_MIN_CHARS: usize = 2;

/// 生成请求体（`POST /generate-image`）。
///
/// `prompt` 以原始 JSON 值接收，类型与长度校验在 [`validate_prompt`] 中完成，
/// 以便返回统一的 ProblemDetails。
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
pub struct PromptRequest {
    /// 提示词
    #[serde(default)]
    #[schema(value_type = String, example = "a watercolor fox in the snow")]
    pub prompt: Option<serde_json::Value>,
}

/// 校验并规范化提示词：必须为字符串，去除首尾空白后至少 2 个字符。
pub fn validate_prompt(raw: Option<&serde_json::Value>) -> Result<String, AppError> {
    let Some(serde_json::Value::String(s)) = raw else {
        return Err(AppError::Validation("prompt must be a string".to_string()));
    };
    validate_prompt_text(s)
}

/// 文本形式的提示词（multipart 字段）校验
pub fn validate_prompt_text(s: &str) -> Result<String, AppError> {
    let trimmed = s.trim();
    if trimmed.chars().count() < PROMPT_MIN_CHARS {
        return Err(AppError::Validation(format!(
            "prompt must be longer than or equal to {PROMPT_MIN_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// 模型列表接口的原始响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelListResponse {
    #[serde(default)]
    pub models: Vec<Model>,
}

/// Google 生成式模型描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// 资源名，如 `models/gemini-2.0-flash`
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_token_limit: u64,
    #[serde(default)]
    pub output_token_limit: u64,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f64>,
}
