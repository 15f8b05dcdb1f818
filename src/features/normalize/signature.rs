use super::types::DetectedSignature;

/// 魔数识别能力（可替换/可 mock）
pub trait SignatureDetector: Send + Sync {
    /// 根据字节头推导真实类型；无法识别返回 `None`
    fn detect(&self, bytes: &[u8]) -> Option<DetectedSignature>;
}

const PNG: DetectedSignature = DetectedSignature::new("image/png", "png");
const JPEG: DetectedSignature = DetectedSignature::new("image/jpeg", "jpeg");
const WEBP: DetectedSignature = DetectedSignature::new("image/webp", "webp");
const GIF: DetectedSignature = DetectedSignature::new("image/gif", "gif");
const BMP: DetectedSignature = DetectedSignature::new("image/bmp", "bmp");
const TIFF: DetectedSignature = DetectedSignature::new("image/tiff", "tif");
const ICO: DetectedSignature = DetectedSignature::new("image/x-icon", "ico");
const QOI: DetectedSignature = DetectedSignature::new("image/qoi", "qoi");
const PSD: DetectedSignature = DetectedSignature::new("image/vnd.adobe.photoshop", "psd");
const EXR: DetectedSignature = DetectedSignature::new("image/x-exr", "exr");
const HDR: DetectedSignature = DetectedSignature::new("image/vnd.radiance", "hdr");
const AVIF: DetectedSignature = DetectedSignature::new("image/avif", "avif");
const HEIC: DetectedSignature = DetectedSignature::new("image/heic", "heic");
const JXL: DetectedSignature = DetectedSignature::new("image/jxl", "jxl");
pub(crate) const SVG: DetectedSignature = DetectedSignature::new("image/svg+xml", "svg");

const PDF: DetectedSignature = DetectedSignature::new("application/pdf", "pdf");
const ZIP: DetectedSignature = DetectedSignature::new("application/zip", "zip");
const GZIP: DetectedSignature = DetectedSignature::new("application/gzip", "gz");
const SEVEN_Z: DetectedSignature = DetectedSignature::new("application/x-7z-compressed", "7z");
const RAR: DetectedSignature = DetectedSignature::new("application/x-rar-compressed", "rar");
const ELF: DetectedSignature = DetectedSignature::new("application/x-elf", "elf");
const EXE: DetectedSignature = DetectedSignature::new("application/x-msdownload", "exe");
const WASM: DetectedSignature = DetectedSignature::new("application/wasm", "wasm");
const SQLITE: DetectedSignature = DetectedSignature::new("application/x-sqlite3", "sqlite");
const OGG: DetectedSignature = DetectedSignature::new("audio/ogg", "ogg");
const MP3: DetectedSignature = DetectedSignature::new("audio/mpeg", "mp3");
const FLAC: DetectedSignature = DetectedSignature::new("audio/x-flac", "flac");
const WAV: DetectedSignature = DetectedSignature::new("audio/wav", "wav");
const AVI: DetectedSignature = DetectedSignature::new("video/vnd.avi", "avi");
const MP4: DetectedSignature = DetectedSignature::new("video/mp4", "mp4");
const MKV: DetectedSignature = DetectedSignature::new("video/x-matroska", "mkv");

/// 文件头前缀匹配规则
struct Magic {
    pattern: &'static [u8],
    signature: DetectedSignature,
}

const fn magic(pattern: &'static [u8], signature: DetectedSignature) -> Magic {
    Magic { pattern, signature }
}

/// 按顺序匹配，长前缀放在前面，避免被短前缀（如 `BM`、`MZ`）抢先命中。
const MAGIC_TABLE: &[Magic] = &[
    magic(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], PNG),
    magic(
        &[0x00, 0x00, 0x00, 0x0C, b'J', b'X', b'L', b' ', 0x0D, 0x0A, 0x87, 0x0A],
        JXL,
    ),
    magic(b"SQLite format 3\0", SQLITE),
    magic(b"#?RADIANCE", HDR),
    magic(b"GIF87a", GIF),
    magic(b"GIF89a", GIF),
    magic(&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C], SEVEN_Z),
    magic(&[b'R', b'a', b'r', b'!', 0x1A, 0x07], RAR),
    magic(b"%PDF-", PDF),
    magic(&[b'P', b'K', 0x03, 0x04], ZIP),
    magic(&[0x7F, b'E', b'L', b'F'], ELF),
    magic(&[0x00, b'a', b's', b'm'], WASM),
    magic(&[0x76, 0x2F, 0x31, 0x01], EXR),
    magic(&[0x1A, 0x45, 0xDF, 0xA3], MKV),
    magic(&[b'I', b'I', 0x2A, 0x00], TIFF),
    magic(&[b'M', b'M', 0x00, 0x2A], TIFF),
    magic(&[0x00, 0x00, 0x01, 0x00], ICO),
    magic(b"qoif", QOI),
    magic(b"8BPS", PSD),
    magic(b"OggS", OGG),
    magic(b"fLaC", FLAC),
    magic(&[0xFF, 0xD8, 0xFF], JPEG),
    magic(b"ID3", MP3),
    magic(&[0x1F, 0x8B], GZIP),
    magic(&[0xFF, 0x0A], JXL),
    magic(b"BM", BMP),
    magic(b"MZ", EXE),
];

/// 基于静态魔数表的识别器。
///
/// RIFF / ISO-BMFF 容器需要看子类型，SVG 是文本格式需要跳过 XML 前导，单独处理。
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicNumberDetector;

impl MagicNumberDetector {
    pub fn new() -> Self {
        Self
    }
}

impl SignatureDetector for MagicNumberDetector {
    fn detect(&self, bytes: &[u8]) -> Option<DetectedSignature> {
        if let Some(sig) = detect_riff(bytes).or_else(|| detect_iso_bmff(bytes)) {
            return Some(sig);
        }
        if let Some(m) = MAGIC_TABLE.iter().find(|m| bytes.starts_with(m.pattern)) {
            return Some(m.signature);
        }
        if looks_like_svg(bytes) {
            return Some(SVG);
        }
        None
    }
}

/// RIFF 容器：`RIFF <size> <fourcc>`
fn detect_riff(bytes: &[u8]) -> Option<DetectedSignature> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" {
        return None;
    }
    match &bytes[8..12] {
        b"WEBP" => Some(WEBP),
        b"WAVE" => Some(WAV),
        b"AVI " => Some(AVI),
        _ => None,
    }
}

/// ISO-BMFF（`....ftyp<brand>`）：AVIF/HEIC 属于图片，其余品牌按视频处理
fn detect_iso_bmff(bytes: &[u8]) -> Option<DetectedSignature> {
    if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
        return None;
    }
    match &bytes[8..12] {
        b"avif" | b"avis" => Some(AVIF),
        b"heic" | b"heix" | b"hevc" | b"hevx" | b"mif1" | b"msf1" => Some(HEIC),
        _ => Some(MP4),
    }
}

/// 只检查文件开头的有限窗口
const SVG_SNIFF_WINDOW: usize = 4096;

/// 文本嗅探：跳过 BOM、空白、XML 声明、注释与 DOCTYPE 后，根元素必须是 `<svg`
fn looks_like_svg(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(SVG_SNIFF_WINDOW)];
    let text = String::from_utf8_lossy(window);
    let mut rest = text.trim_start_matches('\u{feff}').trim_start();

    loop {
        if let Some(after) = rest.strip_prefix("<?xml") {
            let Some(end) = after.find("?>") else {
                return false;
            };
            rest = after[end + 2..].trim_start();
        } else if let Some(after) = rest.strip_prefix("<!--") {
            let Some(end) = after.find("-->") else {
                return false;
            };
            rest = after[end + 3..].trim_start();
        } else if let Some(after) = rest.strip_prefix("<!DOCTYPE") {
            // 带内部子集的 DOCTYPE 以 `]>` 结束
            let terminator = if after.split('>').next().is_some_and(|s| s.contains('[')) {
                "]>"
            } else {
                ">"
            };
            let Some(end) = after.find(terminator) else {
                return false;
            };
            rest = after[end + terminator.len()..].trim_start();
        } else {
            break;
        }
    }

    rest.strip_prefix("<svg")
        .and_then(|after| after.chars().next())
        .is_some_and(|c| c.is_whitespace() || c == '>' || c == '/')
}

#[cfg(test)]
mod tests {
    use super::{MagicNumberDetector, SignatureDetector};

    fn mime_of(bytes: &[u8]) -> Option<&'static str> {
        MagicNumberDetector.detect(bytes).map(|s| s.mime_type())
    }

    #[test]
    fn detects_allowed_formats() {
        assert_eq!(
            mime_of(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00]),
            Some("image/png")
        );
        assert_eq!(mime_of(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(
            mime_of(b"RIFF\x22\x00\x00\x00WEBPVP8 "),
            Some("image/webp")
        );
    }

    #[test]
    fn detects_non_allowed_images() {
        assert_eq!(mime_of(b"GIF89a\x01\x00"), Some("image/gif"));
        assert_eq!(mime_of(b"BM\x3a\x00\x00\x00"), Some("image/bmp"));
        assert_eq!(mime_of(b"II*\x00\x08\x00"), Some("image/tiff"));
        assert_eq!(mime_of(b"MM\x00*\x00\x00"), Some("image/tiff"));
        assert_eq!(
            mime_of(b"\x00\x00\x00\x1cftypavif\x00\x00\x00\x00"),
            Some("image/avif")
        );
        assert_eq!(
            mime_of(b"\x00\x00\x00\x18ftypheic\x00\x00\x00\x00"),
            Some("image/heic")
        );
    }

    #[test]
    fn detects_non_image_containers() {
        assert_eq!(mime_of(b"%PDF-1.7\n"), Some("application/pdf"));
        assert_eq!(mime_of(b"PK\x03\x04\x14\x00"), Some("application/zip"));
        assert_eq!(mime_of(b"RIFF\x00\x00\x00\x00WAVEfmt "), Some("audio/wav"));
        assert_eq!(
            mime_of(b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00"),
            Some("video/mp4")
        );
        assert_eq!(mime_of(b"\x7fELF\x02\x01\x01"), Some("application/x-elf"));
    }

    #[test]
    fn unknown_riff_subtype_is_not_recognized() {
        assert_eq!(mime_of(b"RIFF\x00\x00\x00\x00ABCD"), None);
    }

    #[test]
    fn plain_text_and_empty_are_unrecognized() {
        assert_eq!(mime_of(b"This is not an image"), None);
        assert_eq!(mime_of(b""), None);
        assert_eq!(mime_of(b"invalid jpeg"), None);
    }

    #[test]
    fn svg_sniffing_skips_xml_prolog() {
        let svg = "\u{feff}<?xml version=\"1.0\"?>\n<!-- icon -->\n<!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"x.dtd\">\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>";
        assert_eq!(mime_of(svg.as_bytes()), Some("image/svg+xml"));
        assert_eq!(mime_of(b"<svg>"), Some("image/svg+xml"));
        assert_eq!(mime_of(b"<svgfoo>"), None);
        assert_eq!(mime_of(b"<html><svg></svg></html>"), None);
        assert_eq!(mime_of(b"<?xml version=\"1.0\""), None);
    }
}
