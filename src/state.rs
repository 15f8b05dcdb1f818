use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::features::generation::client::{GoogleAiClient, GoogleAiError};
use crate::features::generation::models::Model;
use crate::features::normalize::{DecodeLimits, ImageNormalizer};

/// 模型列表缓存使用的固定键
pub const MODELS_CACHE_KEY: &str = "models";

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 上传图片规范化管线（无状态，可并发调用）
    pub normalizer: Arc<ImageNormalizer>,
    pub google_ai: Arc<GoogleAiClient>,
    /// 控制并发规范化的信号量（限制 CPU 密集型解码/编码任务数量）
    pub normalize_semaphore: Arc<Semaphore>,
    /// 信号量的总许可数（退出时据此等待全部任务结束）
    pub normalize_permits: usize,
    /// 单次规范化超时
    pub normalize_timeout: Duration,
    /// 模型列表缓存（TTL 为 0 时关闭）
    pub models_cache: Option<Cache<&'static str, Arc<Vec<Model>>>>,
}

impl AppState {
    /// 按配置构建共享状态
    pub fn from_config(config: &AppConfig) -> Result<Self, GoogleAiError> {
        let google_ai = GoogleAiClient::new(&config.google_ai)?;
        let permits = config.upload.parallelism().max(1);

        let ttl = config.google_ai.models_cache_ttl_secs;
        let models_cache = (ttl > 0).then(|| {
            Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(ttl))
                .build()
        });

        Ok(Self {
            normalizer: Arc::new(ImageNormalizer::with_limits(DecodeLimits::from(
                &config.normalizer,
            ))),
            google_ai: Arc::new(google_ai),
            normalize_semaphore: Arc::new(Semaphore::new(permits)),
            normalize_permits: permits,
            normalize_timeout: config.upload.normalize_timeout(),
            models_cache,
        })
    }
}
