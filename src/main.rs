use image_gen_backend::app::build_router;
use image_gen_backend::shutdown::drain_permits;
use image_gen_backend::state::AppState;
use image_gen_backend::{ShutdownManager, config::AppConfig};

fn init_tracing(logging: Option<&image_gen_backend::config::LoggingConfig>) {
    let level = logging.map(|l| l.level.as_str()).unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("image_gen_backend={level},tower_http={level}").into()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.is_some_and(|l| l.format.eq_ignore_ascii_case("compact")) {
        builder.compact().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    // 先加载配置，以便日志级别/格式可由配置决定；加载错误在日志初始化后再输出
    let config_result = AppConfig::init_global();
    init_tracing(config_result.as_ref().ok().map(|_| &AppConfig::global().logging));
    if let Err(e) = config_result {
        tracing::error!("Config init failed: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    // Shared state
    let app_state = match AppState::from_config(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Google AI client init failed: {}", e);
            std::process::exit(1);
        }
    };
    let semaphore = app_state.normalize_semaphore.clone();
    let permits = app_state.normalize_permits;

    // Routes
    let app = build_router(app_state, config);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("OpenAPI: http://{}/api-docs/openapi.json", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!(
        "Model: {}, upload limit: {} bytes, normalize permits: {}",
        config.google_ai.model,
        config.upload.max_bytes,
        permits
    );

    let shutdown_timeout = config.shutdown.timeout_duration();
    let manager = shutdown_manager.clone();
    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        let reason = manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
    });

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    // 超时返回的请求可能仍有规范化任务在阻塞线程池中运行
    match drain_permits(&semaphore, permits, shutdown_timeout).await {
        Ok(()) => tracing::info!("服务器已优雅关闭"),
        Err(e) => tracing::warn!("{}，强制退出", e),
    }
}
