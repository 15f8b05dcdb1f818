use std::panic::{AssertUnwindSafe, catch_unwind};

use axum::body::Bytes;

use super::signature::{MagicNumberDetector, SignatureDetector};
use super::transcoder::{DecodeLimits, ImageCrateTranscoder, TranscodeError, Transcoder};
use super::types::{AllowedFormat, NormalizeError, NormalizedImage, UploadedImage};

/// 上传图片规范化管线。
///
/// 流程是线性的：存在性检查 → 魔数识别 → 图片类别检查 → 直通 / 转码。
/// 调用方声明的文件名与 MIME 不参与任何判定；实例无可变状态，可跨线程并发调用。
pub struct ImageNormalizer {
    detector: Box<dyn SignatureDetector>,
    transcoder: Box<dyn Transcoder>,
}

impl ImageNormalizer {
    pub fn new(
        detector: impl SignatureDetector + 'static,
        transcoder: impl Transcoder + 'static,
    ) -> Self {
        Self {
            detector: Box::new(detector),
            transcoder: Box::new(transcoder),
        }
    }

    /// 魔数表识别 + `image`/resvg 转码的默认组合
    pub fn with_limits(limits: DecodeLimits) -> Self {
        Self::new(MagicNumberDetector::new(), ImageCrateTranscoder::new(limits))
    }

    /// 将上传文件规范化为下游 API 可接受的格式。
    ///
    /// - 格式已在允许集合内：完整解码校验后原样返回字节（不重编码）
    /// - 其它图片：转码为 PNG
    /// - 非图片 / 无法识别：`NotAnImage`；解码或编码失败：`ConversionFailed`
    pub fn normalize(
        &self,
        upload: Option<UploadedImage>,
    ) -> Result<NormalizedImage, NormalizeError> {
        let Some(upload) = upload else {
            tracing::debug!("未上传文件");
            return Err(NormalizeError::MissingFile);
        };

        let Some(signature) = self.detector.detect(&upload.raw_bytes) else {
            tracing::debug!(
                "无法识别文件类型: name={:?}, declared_mime={:?}, size={}",
                upload.declared_name,
                upload.declared_mime_type,
                upload.raw_bytes.len()
            );
            return Err(NormalizeError::NotAnImage);
        };
        if !signature.is_image() {
            tracing::debug!("文件类型 {} 不是图片", signature.mime_type());
            return Err(NormalizeError::NotAnImage);
        }

        if let Some(format) = signature.allowed_format() {
            self.guarded(|| self.transcoder.verify(&upload.raw_bytes, &signature))
                .map_err(|e| {
                    tracing::warn!("{} 直通校验失败: {}", signature.mime_type(), e);
                    NormalizeError::ConversionFailed
                })?;
            tracing::debug!("{} 已是允许格式，直通", format.mime_type());
            return Ok(NormalizedImage {
                name: rewrite_extension(&upload.declared_name, format),
                bytes: upload.raw_bytes,
                format,
            });
        }

        let target = AllowedFormat::CANONICAL;
        tracing::debug!("将 {} 转码为 {}", signature.mime_type(), target.mime_type());
        let converted = self
            .guarded(|| self.transcoder.transcode(&upload.raw_bytes, &signature, target))
            .map_err(|e| {
                tracing::warn!("转换上传图片失败（{}）: {}", signature.mime_type(), e);
                NormalizeError::ConversionFailed
            })?;
        tracing::debug!(
            "转码完成: {:.2} MB",
            converted.len() as f64 / (1024.0 * 1024.0)
        );

        Ok(NormalizedImage {
            name: rewrite_extension(&upload.declared_name, target),
            bytes: Bytes::from(converted),
            format: target,
        })
    }

    /// 解码器内部 panic 也只能表现为转码失败，不能让请求线程崩溃
    fn guarded<T>(
        &self,
        f: impl FnOnce() -> Result<T, TranscodeError>,
    ) -> Result<T, TranscodeError> {
        catch_unwind(AssertUnwindSafe(f))
            .unwrap_or_else(|_| Err(TranscodeError::Decode("解码器内部 panic".to_string())))
    }
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::with_limits(DecodeLimits::default())
    }
}

/// 按最终格式改写文件名扩展名。
///
/// 只取最后一个路径分量（`/` 与 `\` 均视为分隔符），去掉最后一个扩展名；
/// 以点开头的名字（如 `.hidden`）整体视为主干。主干为空时使用 `image`。
pub fn rewrite_extension(declared_name: &str, format: AllowedFormat) -> String {
    let base = declared_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    let stem = if stem.is_empty() { "image" } else { stem };
    format!("{stem}.{}", format.extension())
}
