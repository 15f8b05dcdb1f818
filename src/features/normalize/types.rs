use axum::body::Bytes;
use serde::Serialize;
use thiserror::Error;

/// 下游生成 API 原生接受的图片格式（无需转码）
#[derive(Debug, Clone, Copy, Serialize, utoipa::ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AllowedFormat {
    /// PNG（无损，亦为转码兜底格式）
    Png,
    /// JPEG
    Jpeg,
    /// WebP
    Webp,
}

impl AllowedFormat {
    /// 允许直通的完整格式集合
    pub const ALL: [AllowedFormat; 3] = [
        AllowedFormat::Png,
        AllowedFormat::Jpeg,
        AllowedFormat::Webp,
    ];

    /// 不在集合内的图片统一转码到该格式
    pub const CANONICAL: AllowedFormat = AllowedFormat::Png;

    pub fn mime_type(self) -> &'static str {
        match self {
            AllowedFormat::Png => "image/png",
            AllowedFormat::Jpeg => "image/jpeg",
            AllowedFormat::Webp => "image/webp",
        }
    }

    /// 与 MIME 对应的规范扩展名（不含点）
    pub fn extension(self) -> &'static str {
        match self {
            AllowedFormat::Png => "png",
            AllowedFormat::Jpeg => "jpeg",
            AllowedFormat::Webp => "webp",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.mime_type() == mime)
    }
}

/// 通过魔数识别出的真实类型。
///
/// 只由字节内容推导，与调用方声明的 MIME / 文件名无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedSignature {
    mime_type: &'static str,
    extension: &'static str,
}

impl DetectedSignature {
    pub const fn new(mime_type: &'static str, extension: &'static str) -> Self {
        Self {
            mime_type,
            extension,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn extension(&self) -> &'static str {
        self.extension
    }

    /// 类别判定：仅 `image/*` 视为图片
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// 命中允许集合时返回对应格式（可直通）
    pub fn allowed_format(&self) -> Option<AllowedFormat> {
        AllowedFormat::from_mime_type(self.mime_type)
    }
}

/// 请求中收到的上传文件（名称与 MIME 均不可信）
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub raw_bytes: Bytes,
    pub declared_name: String,
    /// 仅作日志参考，不参与任何判定
    pub declared_mime_type: Option<String>,
}

impl UploadedImage {
    pub fn new(raw_bytes: impl Into<Bytes>, declared_name: impl Into<String>) -> Self {
        Self {
            raw_bytes: raw_bytes.into(),
            declared_name: declared_name.into(),
            declared_mime_type: None,
        }
    }

    pub fn with_declared_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime_type = Some(mime.into());
        self
    }
}

/// 规范化结果：格式一定属于 [`AllowedFormat`]，文件名扩展名与之匹配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub bytes: Bytes,
    pub format: AllowedFormat,
    pub name: String,
}

impl NormalizedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// 上传校验错误。
///
/// `Display` 即对外展示的固定文案，内部解码细节只进日志。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, utoipa::ToSchema)]
pub enum NormalizeError {
    /// 请求中没有文件
    #[error("No file was uploaded.")]
    MissingFile,
    /// 魔数无法识别或不是图片
    #[error(
        "The uploaded file must be an image. Please ensure the image has a .png, .jpeg, or .webp extension."
    )]
    NotAnImage,
    /// 解码/编码失败（损坏、超限、不支持的子格式等）
    #[error(
        "An error occurred while converting the uploaded image. Please ensure the image has a .png, .jpeg, or .webp extension."
    )]
    ConversionFailed,
}

impl NormalizeError {
    /// 稳定错误码，用于 ProblemDetails.code
    pub fn stable_code(&self) -> &'static str {
        match self {
            NormalizeError::MissingFile => "MISSING_FILE",
            NormalizeError::NotAnImage => "NOT_AN_IMAGE",
            NormalizeError::ConversionFailed => "IMAGE_CONVERSION_FAILED",
        }
    }
}
