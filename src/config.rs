use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（未设置 RUST_LOG 时生效）
    pub level: String,
    /// 日志格式：full | compact
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

/// Google 生成式 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleAiConfig {
    /// API Key（必填，可由 `GOOGLE_AI_API_KEY` 提供）
    #[serde(default)]
    pub api_key: String,
    /// 模型列表接口地址（必填，可由 `GOOGLE_AI_MODELS_API` 提供）
    #[serde(default = "GoogleAiConfig::default_models_api")]
    pub models_api: String,
    /// 生成图片所用模型（必填，可由 `MODEL` 提供）
    #[serde(default = "GoogleAiConfig::default_model")]
    pub model: String,
    /// generateContent 所在的 API 根地址
    #[serde(default = "GoogleAiConfig::default_base_url")]
    pub base_url: String,
    /// 上游请求超时（秒）
    #[serde(default = "GoogleAiConfig::default_timeout")]
    pub timeout_secs: u64,
    /// 模型列表缓存 TTL（秒），0 表示不缓存
    #[serde(default = "GoogleAiConfig::default_models_cache_ttl")]
    pub models_cache_ttl_secs: u64,
}

impl GoogleAiConfig {
    fn default_models_api() -> String {
        "https://generativelanguage.googleapis.com/v1beta/models".to_string()
    }
    fn default_model() -> String {
        "gemini-2.0-flash-preview-image-generation".to_string()
    }
    fn default_base_url() -> String {
        "https://generativelanguage.googleapis.com/v1beta".to_string()
    }
    fn default_timeout() -> u64 {
        120
    }
    fn default_models_cache_ttl() -> u64 {
        300
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for GoogleAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            models_api: Self::default_models_api(),
            model: Self::default_model(),
            base_url: Self::default_base_url(),
            timeout_secs: Self::default_timeout(),
            models_cache_ttl_secs: Self::default_models_cache_ttl(),
        }
    }
}

/// 上传处理配置（请求层负责的大小/并发/超时上限）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// multipart 请求体上限（字节）
    #[serde(default = "UploadConfig::default_max_bytes")]
    pub max_bytes: usize,
    /// 并发规范化许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
    /// 单次规范化超时（秒）
    #[serde(default = "UploadConfig::default_normalize_timeout")]
    pub normalize_timeout_secs: u64,
}

impl UploadConfig {
    fn default_max_bytes() -> usize {
        10 * 1024 * 1024
    }
    fn default_normalize_timeout() -> u64 {
        30
    }

    pub fn normalize_timeout(&self) -> Duration {
        Duration::from_secs(self.normalize_timeout_secs.max(1))
    }

    /// 实际并发许可数
    pub fn parallelism(&self) -> usize {
        if self.max_parallel == 0 {
            num_cpus::get()
        } else {
            self.max_parallel as usize
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: Self::default_max_bytes(),
            max_parallel: 0,
            normalize_timeout_secs: Self::default_normalize_timeout(),
        }
    }
}

/// 解码资源上限（防解压炸弹）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// 最大宽度（像素）
    #[serde(default = "NormalizerConfig::default_max_dim")]
    pub max_width: u32,
    /// 最大高度（像素）
    #[serde(default = "NormalizerConfig::default_max_dim")]
    pub max_height: u32,
    /// 解码过程最大内存分配（字节）
    #[serde(default = "NormalizerConfig::default_max_alloc")]
    pub max_alloc_bytes: u64,
}

impl NormalizerConfig {
    fn default_max_dim() -> u32 {
        16384
    }
    fn default_max_alloc() -> u64 {
        512 * 1024 * 1024
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_width: Self::default_max_dim(),
            max_height: Self::default_max_dim(),
            max_alloc_bytes: Self::default_max_alloc(),
        }
    }
}

/// CORS 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 是否启用 CORS
    #[serde(default = "CorsConfig::default_enabled")]
    pub enabled: bool,
    /// 允许的 Origin 列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// 允许的方法列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// 允许的请求头列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// 暴露的响应头列表（支持 "*" 表示任意）
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// 是否允许携带凭证（Cookie/Authorization）
    #[serde(default = "CorsConfig::default_allow_credentials")]
    pub allow_credentials: bool,
    /// 预检缓存时间（秒）
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl CorsConfig {
    fn default_enabled() -> bool {
        false
    }

    fn default_allow_credentials() -> bool {
        false
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            allowed_origins: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            expose_headers: Vec::new(),
            allow_credentials: Self::default_allow_credentials(),
            max_age_secs: None,
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Google 生成式 API
    #[serde(default)]
    pub google_ai: GoogleAiConfig,
    /// 上传请求限制
    #[serde(default)]
    pub upload: UploadConfig,
    /// 解码资源上限
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    /// CORS 配置
    #[serde(default)]
    pub cors: CorsConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// 兼容旧部署的环境变量名 → 配置键
const LEGACY_ENV_KEYS: [(&str, &str); 3] = [
    ("GOOGLE_AI_API_KEY", "google_ai.api_key"),
    ("GOOGLE_AI_MODELS_API", "google_ai.models_api"),
    ("MODEL", "google_ai.model"),
];

impl AppConfig {
    /// 加载顺序：config.toml（可选）→ `APP__SECTION__KEY` 环境变量 → 旧版环境变量名。
    /// 工作目录下的 `.env` 会先被读入进程环境。
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::info!("已加载环境变量文件 {:?}", path);
        }

        let config_path = Self::get_config_path();
        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let mut builder = ConfigBuilder::builder()
            .add_source(File::from(config_path.as_path()).required(false))
            // 例如：APP__SERVER__PORT=8080、APP__UPLOAD__MAX_BYTES=1048576
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        for (env_key, config_key) in LEGACY_ENV_KEYS {
            let value = std::env::var(env_key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            builder = builder.set_override_option(config_key, value)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            "配置加载完成: model = {}, api_key = {}",
            config.google_ai.model,
            api_key_summary(&config.google_ai.api_key)
        );

        Ok(config)
    }

    /// 必填项校验（去除首尾空白后不得为空）
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("GOOGLE_AI_API_KEY", &self.google_ai.api_key),
            ("GOOGLE_AI_MODELS_API", &self.google_ai.models_api),
            ("MODEL", &self.google_ai.model),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(k, _)| format!("{k} is required."))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(format!(
                "配置校验失败: {}",
                missing.join(" ")
            )))
        }
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径（`APP_CONFIG_FILE` 可覆盖）
    fn get_config_path() -> PathBuf {
        std::env::var("APP_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 日志中只描述密钥是否存在，不输出任何字符
fn api_key_summary(api_key: &str) -> &'static str {
    if api_key.trim().is_empty() {
        "<未设置>"
    } else {
        "<已设置>"
    }
}
