use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{ColorType, DynamicImage, ImageError, ImageFormat, ImageReader, Limits, RgbaImage};
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg;
use thiserror::Error;

use super::signature::SVG;
use super::types::{AllowedFormat, DetectedSignature};
use crate::config::NormalizerConfig;

/// 转码内部错误（仅用于日志，对外统一映射为 ConversionFailed）
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// 当前解码器不支持该格式
    #[error("不支持的图片格式: {0}")]
    Unsupported(&'static str),
    /// 解码失败（数据损坏、截断等）
    #[error("解码失败: {0}")]
    Decode(String),
    /// 超过尺寸/内存限制
    #[error("超出解码限制: {0}")]
    Limits(String),
    /// 编码失败
    #[error("编码失败: {0}")]
    Encode(String),
}

impl From<ImageError> for TranscodeError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Limits(e) => TranscodeError::Limits(e.to_string()),
            ImageError::Unsupported(e) => TranscodeError::Decode(e.to_string()),
            ImageError::Encoding(e) => TranscodeError::Encode(e.to_string()),
            other => TranscodeError::Decode(other.to_string()),
        }
    }
}

/// 解码/转码能力（可替换/可 mock）
pub trait Transcoder: Send + Sync {
    /// 完整解码一次以确认数据可用，不产生新字节（直通前校验）
    fn verify(&self, bytes: &[u8], signature: &DetectedSignature) -> Result<(), TranscodeError>;

    /// 解码后重新编码为目标格式。
    ///
    /// `target` 可以是任一允许格式；规范化管线固定使用 `AllowedFormat::CANONICAL`。
    fn transcode(
        &self,
        bytes: &[u8],
        signature: &DetectedSignature,
        target: AllowedFormat,
    ) -> Result<Vec<u8>, TranscodeError>;
}

/// 解码资源上限，防止解压炸弹
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_alloc_bytes: u64,
}

impl DecodeLimits {
    /// 转码路径：宽高与分配上限都生效
    fn to_image_limits(self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_width);
        limits.max_image_height = Some(self.max_height);
        limits.max_alloc = Some(self.max_alloc_bytes);
        limits
    }

    /// 直通校验：文件本身已是合法的目标格式，不按宽高拒绝，只保留分配上限
    fn to_passthrough_limits(self) -> Limits {
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_alloc_bytes);
        limits
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), TranscodeError> {
        if width > self.max_width || height > self.max_height {
            return Err(TranscodeError::Limits(format!(
                "尺寸 {width}x{height} 超过上限 {}x{}",
                self.max_width, self.max_height
            )));
        }
        let rgba_bytes = u64::from(width) * u64::from(height) * 4;
        if rgba_bytes > self.max_alloc_bytes {
            return Err(TranscodeError::Limits(format!(
                "像素缓冲 {rgba_bytes}B 超过上限 {}B",
                self.max_alloc_bytes
            )));
        }
        Ok(())
    }
}

impl From<&NormalizerConfig> for DecodeLimits {
    fn from(cfg: &NormalizerConfig) -> Self {
        Self {
            max_width: cfg.max_width,
            max_height: cfg.max_height,
            max_alloc_bytes: cfg.max_alloc_bytes,
        }
    }
}

impl Default for DecodeLimits {
    fn default() -> Self {
        (&NormalizerConfig::default()).into()
    }
}

/// 默认实现：位图走 `image` crate，SVG 走 resvg 栅格化。
#[derive(Debug, Clone, Default)]
pub struct ImageCrateTranscoder {
    limits: DecodeLimits,
}

/// 有损目标（JPEG）的编码质量
const JPEG_QUALITY: u8 = 90;

impl ImageCrateTranscoder {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    fn decode(
        &self,
        bytes: &[u8],
        signature: &DetectedSignature,
        limits: Limits,
    ) -> Result<DynamicImage, TranscodeError> {
        if *signature == SVG {
            return self.rasterize_svg(bytes);
        }
        let format = raster_format(signature)
            .ok_or(TranscodeError::Unsupported(signature.mime_type()))?;
        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(limits);
        Ok(reader.decode()?)
    }

    /// 栅格化 SVG。禁止解析外部文件引用，仅允许 data URI 内嵌图片。
    fn rasterize_svg(&self, bytes: &[u8]) -> Result<DynamicImage, TranscodeError> {
        let opts = usvg::Options {
            resources_dir: None,
            image_href_resolver: usvg::ImageHrefResolver {
                resolve_data: usvg::ImageHrefResolver::default_data_resolver(),
                resolve_string: Box::new(|_: &str, _: &usvg::Options| None),
            },
            ..Default::default()
        };
        let tree = usvg::Tree::from_data(bytes, &opts)
            .map_err(|e| TranscodeError::Decode(format!("SVG 解析失败: {e}")))?;

        let size = tree.size().to_int_size();
        let (width, height) = (size.width(), size.height());
        self.limits.check_dimensions(width, height)?;

        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| TranscodeError::Decode("创建 pixmap 失败".to_string()))?;
        resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());

        // tiny-skia 像素为预乘 alpha，转回直通 alpha 再交给编码器
        let mut rgba = Vec::with_capacity(pixmap.data().len());
        for px in pixmap.pixels() {
            let c = px.demultiply();
            rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        let image = RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| TranscodeError::Decode("像素缓冲尺寸不匹配".to_string()))?;
        Ok(DynamicImage::ImageRgba8(image))
    }
}

impl Transcoder for ImageCrateTranscoder {
    fn verify(&self, bytes: &[u8], signature: &DetectedSignature) -> Result<(), TranscodeError> {
        self.decode(bytes, signature, self.limits.to_passthrough_limits())?;
        // JPEG 解码器会把截断的扫描数据补齐后照常返回，需另行确认数据完整
        if signature.allowed_format() == Some(AllowedFormat::Jpeg) && !jpeg_scan_is_complete(bytes) {
            return Err(TranscodeError::Decode("JPEG 扫描数据不完整（缺少 EOI）".to_string()));
        }
        Ok(())
    }

    fn transcode(
        &self,
        bytes: &[u8],
        signature: &DetectedSignature,
        target: AllowedFormat,
    ) -> Result<Vec<u8>, TranscodeError> {
        let image = self.decode(bytes, signature, self.limits.to_image_limits())?;
        encode(&image, target)
    }
}

/// 最后一个 SOS（`FF DA`）之后必须出现 EOI（`FF D9`）。
///
/// 熵编码段中的 `FF` 总是跟随 `00` 或 RSTn，所以这两个标记不会在扫描数据里误出现；
/// EOI 之后的填充或附加数据不影响判断。
fn jpeg_scan_is_complete(bytes: &[u8]) -> bool {
    const SOS: [u8; 2] = [0xFF, 0xDA];
    const EOI: [u8; 2] = [0xFF, 0xD9];
    let Some(last_scan) = bytes.windows(2).rposition(|w| w == SOS) else {
        return false;
    };
    bytes[last_scan + 2..].windows(2).any(|w| w == EOI)
}

/// 魔数 → `image` crate 解码器；不在表内的图片类型（PSD/HEIC/JXL 等）无法转码
fn raster_format(signature: &DetectedSignature) -> Option<ImageFormat> {
    let format = match signature.mime_type() {
        "image/png" => ImageFormat::Png,
        "image/jpeg" => ImageFormat::Jpeg,
        "image/webp" => ImageFormat::WebP,
        "image/gif" => ImageFormat::Gif,
        "image/bmp" => ImageFormat::Bmp,
        "image/tiff" => ImageFormat::Tiff,
        "image/x-icon" => ImageFormat::Ico,
        "image/qoi" => ImageFormat::Qoi,
        "image/x-exr" => ImageFormat::OpenExr,
        "image/vnd.radiance" => ImageFormat::Hdr,
        "image/avif" => ImageFormat::Avif,
        _ => return None,
    };
    Some(format)
}

fn encode(image: &DynamicImage, target: AllowedFormat) -> Result<Vec<u8>, TranscodeError> {
    let mut out = Vec::new();
    match target {
        AllowedFormat::Png => {
            // 浮点像素（EXR/HDR）PNG 编码器不支持，先量化到 8 位
            let quantized;
            let image = match image.color() {
                ColorType::Rgb32F => {
                    quantized = DynamicImage::ImageRgb8(image.to_rgb8());
                    &quantized
                }
                ColorType::Rgba32F => {
                    quantized = DynamicImage::ImageRgba8(image.to_rgba8());
                    &quantized
                }
                _ => image,
            };
            let encoder =
                PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
            image.write_with_encoder(encoder)?;
        }
        AllowedFormat::Jpeg => {
            // JPEG 不支持 alpha
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
        }
        AllowedFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
        }
    }
    Ok(out)
}
