use std::sync::Arc;

use axum::body::Bytes;
use axum::{
    Json, Router,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::error::AppError;
use crate::features::normalize::{NormalizeError, NormalizedImage, UploadedImage};
use crate::state::{AppState, MODELS_CACHE_KEY};

use super::models::{Model, PromptRequest, validate_prompt, validate_prompt_text};

const MODELS_FETCH_FAILED: &str = "Error while fetching models.";

/// multipart 表单结构（仅用于 OpenAPI 文档）
#[allow(dead_code)]
#[derive(utoipa::ToSchema)]
pub struct EditImageForm {
    /// 编辑指令
    #[schema(example = "make the sky purple")]
    prompt: String,
    /// 待编辑的图片（任意常见图片格式，非 png/jpeg/webp 会被转为 png）
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/generate-image",
    summary = "文生图",
    description = "根据提示词生成一张图片，直接返回图片字节（Content-Type: image/png）。",
    request_body = PromptRequest,
    responses(
        (status = 201, description = "PNG bytes of generated image"),
        (status = 400, description = "Invalid prompt", body = AppError),
        (status = 500, description = "Generation failed", body = AppError)
    ),
    tag = "Generation"
)]
pub async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let prompt = validate_prompt(req.prompt.as_ref())?;

    tracing::info!(
        "生成图片: model={}, prompt_chars={}",
        state.google_ai.model(),
        prompt.chars().count()
    );
    let bytes = state.google_ai.generate_image(&prompt).await.map_err(|e| {
        tracing::error!("生成图片失败: {}", e);
        AppError::Generation
    })?;

    Ok(image_response(bytes))
}

#[utoipa::path(
    post,
    path = "/edit-image",
    summary = "图生图",
    description = "上传一张图片与编辑指令，返回编辑后的图片（Content-Type: image/png）。上传文件按内容魔数识别真实类型：png/jpeg/webp 原样转发，其余图片格式先转为 png。",
    request_body(content = EditImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "PNG bytes of edited image"),
        (status = 400, description = "Invalid prompt or upload", body = AppError),
        (status = 413, description = "Upload too large", body = AppError),
        (status = 500, description = "Generation failed", body = AppError)
    ),
    tag = "Generation"
)]
pub async fn edit_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let form = match multipart {
        Ok(m) => read_edit_form(m).await?,
        Err(e) => {
            // 非 multipart 请求按空表单处理，由下方的字段校验给出具体错误
            tracing::debug!("非 multipart 请求: {}", e);
            EditForm::default()
        }
    };

    let prompt = match form.prompt.as_deref() {
        Some(p) => validate_prompt_text(p)?,
        None => return Err(AppError::Validation("prompt must be a string".to_string())),
    };
    let image = normalize_upload(&state, form.file).await?;

    tracing::info!(
        "编辑图片: model={}, upload={} ({}, {} bytes)",
        state.google_ai.model(),
        image.name,
        image.mime_type(),
        image.bytes.len()
    );
    let bytes = state
        .google_ai
        .edit_image(&prompt, &image)
        .await
        .map_err(|e| {
            tracing::error!("编辑图片失败: {}", e);
            AppError::Generation
        })?;

    Ok(image_response(bytes))
}

#[utoipa::path(
    get,
    path = "/models",
    summary = "可用模型列表",
    description = "返回 Google 生成式 API 的模型列表（内存缓存，TTL 可配置）。",
    responses(
        (status = 200, description = "Model list", body = [Model]),
        (status = 500, description = "Upstream error", body = AppError)
    ),
    tag = "Generation"
)]
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<Model>>, AppError> {
    let fetch = {
        let client = state.google_ai.clone();
        async move { client.list_models().await.map(Arc::new) }
    };

    let models = match &state.models_cache {
        Some(cache) => cache
            .try_get_with(MODELS_CACHE_KEY, fetch)
            .await
            .map_err(|e| {
                tracing::error!("获取模型列表失败: {}", e);
                AppError::Upstream(MODELS_FETCH_FAILED.to_string())
            })?,
        None => fetch.await.map_err(|e| {
            tracing::error!("获取模型列表失败: {}", e);
            AppError::Upstream(MODELS_FETCH_FAILED.to_string())
        })?,
    };

    Ok(Json(models.as_ref().clone()))
}

pub fn create_generation_router() -> Router<AppState> {
    Router::new()
        .route("/generate-image", post(generate_image))
        .route("/edit-image", post(edit_image))
        .route("/models", get(list_models))
}

#[derive(Default)]
struct EditForm {
    prompt: Option<String>,
    file: Option<UploadedImage>,
}

async fn read_edit_form(mut multipart: Multipart) -> Result<EditForm, AppError> {
    let mut form = EditForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("prompt") => {
                form.prompt = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let declared_mime = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                // 浏览器在未选择文件时仍会提交一个空的 file 字段
                if name.is_empty() && data.is_empty() {
                    continue;
                }
                let mut upload = UploadedImage::new(data, name);
                if let Some(mime) = declared_mime {
                    upload = upload.with_declared_mime_type(mime);
                }
                form.file = Some(upload);
            }
            other => {
                tracing::debug!("忽略未知表单字段: {:?}", other);
            }
        }
    }
    Ok(form)
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(
            "The uploaded file exceeds the maximum allowed size.".to_string(),
        )
    } else {
        AppError::Validation(err.body_text())
    }
}

/// 在阻塞线程池上执行规范化：受信号量限流，并带超时。
///
/// 许可随阻塞任务一起释放，超时后任务仍会跑完，但请求立即以 `ConversionFailed` 返回。
async fn normalize_upload(
    state: &AppState,
    upload: Option<UploadedImage>,
) -> Result<NormalizedImage, AppError> {
    // 无文件时无需占用阻塞线程
    if upload.is_none() {
        return Err(NormalizeError::MissingFile.into());
    }

    let permit = state
        .normalize_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(format!("获取规范化信号量失败: {e}")))?;
    let normalizer = state.normalizer.clone();
    let task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        normalizer.normalize(upload)
    });

    match tokio::time::timeout(state.normalize_timeout, task).await {
        Ok(Ok(result)) => Ok(result?),
        Ok(Err(e)) => {
            tracing::warn!("规范化任务执行失败: {}", e);
            Err(NormalizeError::ConversionFailed.into())
        }
        Err(_) => {
            tracing::warn!("规范化超时（{:?}）", state.normalize_timeout);
            Err(NormalizeError::ConversionFailed.into())
        }
    }
}

fn image_response(bytes: Bytes) -> Response {
    let mut headers = axum::http::HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("inline; filename=\"image.png\""),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    (StatusCode::CREATED, headers, bytes).into_response()
}
