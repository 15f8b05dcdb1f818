//! 上传图片规范化：按魔数识别真实类型，允许格式直通，其它图片转码为 PNG。

mod normalizer;
pub mod signature;
pub mod transcoder;
mod types;

pub use normalizer::{ImageNormalizer, rewrite_extension};
pub use signature::{MagicNumberDetector, SignatureDetector};
pub use transcoder::{DecodeLimits, ImageCrateTranscoder, TranscodeError, Transcoder};
pub use types::{AllowedFormat, DetectedSignature, NormalizeError, NormalizedImage, UploadedImage};
