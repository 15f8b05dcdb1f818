use axum::body::Bytes;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GoogleAiConfig;
use crate::features::normalize::NormalizedImage;

use super::models::{Model, ModelListResponse};

/// 上游错误正文在日志中保留的最大字符数
const MAX_LOGGED_BODY_CHARS: usize = 512;

/// Google 生成式 API 调用错误（仅用于日志，不直接返回给调用方）
#[derive(Error, Debug)]
pub enum GoogleAiError {
    #[error("初始化 HTTP Client 失败: {0}")]
    Init(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("请求超时")]
    Timeout,
    #[error("上游返回 HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("响应解析失败: {0}")]
    Json(String),
    #[error("提示词被拦截: {0}")]
    Blocked(String),
    #[error("响应中没有图片数据")]
    NoImage,
    #[error("图片数据解码失败: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GoogleAiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GoogleAiError::Timeout
        } else if err.is_decode() {
            GoogleAiError::Json(err.to_string())
        } else {
            GoogleAiError::Network(err.to_string())
        }
    }
}

/// Google 生成式 API 客户端（generateContent + 模型列表）
#[derive(Clone)]
pub struct GoogleAiClient {
    client: reqwest::Client,
    headers: HeaderMap,
    model: String,
    base_url: String,
    models_api: String,
}

impl GoogleAiClient {
    pub fn new(cfg: &GoogleAiConfig) -> Result<Self, GoogleAiError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout_duration())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GoogleAiError::Init(e.to_string()))?;

        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(cfg.api_key.trim())
            .map_err(|_| GoogleAiError::Init("API Key 含非法字符".to_string()))?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        Ok(Self {
            client,
            headers,
            model: cfg.model.trim().to_string(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            models_api: cfg.models_api.trim().to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 文生图：返回第一张内联图片的原始字节
    pub async fn generate_image(&self, prompt: &str) -> Result<Bytes, GoogleAiError> {
        let body = GenerateContentRequest::new(vec![RequestPart::Text {
            text: prompt.to_string(),
        }]);
        self.generate_content(&body).await
    }

    /// 图生图：图片在前，提示词在后
    pub async fn edit_image(
        &self,
        prompt: &str,
        image: &NormalizedImage,
    ) -> Result<Bytes, GoogleAiError> {
        let body = GenerateContentRequest::new(vec![
            RequestPart::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type().to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
                },
            },
            RequestPart::Text {
                text: prompt.to_string(),
            },
        ]);
        self.generate_content(&body).await
    }

    /// 拉取可用模型列表（响应缺少 `models` 时视为空列表）
    pub async fn list_models(&self) -> Result<Vec<Model>, GoogleAiError> {
        let resp = self
            .client
            .get(&self.models_api)
            .headers(self.headers.clone())
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let parsed: ModelListResponse = resp.json().await?;
        tracing::debug!("获取到 {} 个模型", parsed.models.len());
        Ok(parsed.models)
    }

    async fn generate_content(
        &self,
        body: &GenerateContentRequest,
    ) -> Result<Bytes, GoogleAiError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let parsed: GenerateContentResponse = resp.json().await?;
        parsed.into_image_bytes()
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GoogleAiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(GoogleAiError::Status {
        status: status.as_u16(),
        body: text.chars().take(MAX_LOGGED_BODY_CHARS).collect(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn new(parts: Vec<RequestPart>) -> Self {
        Self {
            contents: vec![RequestContent { parts }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_image_bytes(self) -> Result<Bytes, GoogleAiError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GoogleAiError::Blocked(reason));
        }

        let mut finish_reason = None;
        for candidate in self.candidates {
            finish_reason = finish_reason.or(candidate.finish_reason);
            let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
            for part in parts {
                if let Some(text) = part.text {
                    tracing::debug!("模型附带文本: {}", text);
                }
                if let Some(inline) = part.inline_data {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(inline.data.as_bytes())
                        .map_err(|e| GoogleAiError::Decode(e.to_string()))?;
                    tracing::debug!("收到 {} 图片，{} 字节", inline.mime_type, bytes.len());
                    return Ok(Bytes::from(bytes));
                }
            }
        }

        if let Some(reason) = finish_reason {
            tracing::warn!("生成结束但无图片，finishReason = {}", reason);
        }
        Err(GoogleAiError::NoImage)
    }
}
