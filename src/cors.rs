use axum::http::{HeaderName, HeaderValue, Method, header};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::CorsConfig;

/// 未显式配置 expose_headers 时默认暴露给浏览器的响应头
fn default_expose_headers() -> [HeaderName; 2] {
    [
        header::CONTENT_DISPOSITION,
        HeaderName::from_static(crate::request_id::REQUEST_ID_HEADER),
    ]
}

/// 根据配置构建 CORS 中间件
pub fn build_cors_layer(cors: &CorsConfig) -> Option<CorsLayer> {
    if !cors.enabled {
        return None;
    }

    let origins = parse_list("allowed_origins", &cors.allowed_origins, |v| {
        HeaderValue::from_str(v).ok()
    });
    if !origins.any && origins.items.is_empty() {
        tracing::warn!("CORS 已启用但 allowed_origins 为空，已跳过启用");
        return None;
    }

    let methods = parse_list("allowed_methods", &cors.allowed_methods, |v| {
        Method::from_bytes(v.to_ascii_uppercase().as_bytes()).ok()
    });
    let headers = parse_list("allowed_headers", &cors.allowed_headers, parse_header_name);
    let expose = parse_list("expose_headers", &cors.expose_headers, parse_header_name);

    if cors.allow_credentials && (origins.any || methods.any || headers.any || expose.any) {
        tracing::error!("CORS 配置无效：allow_credentials=true 不能与 \"*\" 同时使用，已跳过启用");
        return None;
    }

    let mut layer = CorsLayer::new();

    layer = if origins.any {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins.items)
    };

    if methods.any {
        layer = layer.allow_methods(Any);
    } else if methods.items.is_empty() {
        layer = layer.allow_methods([Method::GET, Method::POST]);
    } else {
        layer = layer.allow_methods(methods.items);
    }

    if headers.any {
        layer = layer.allow_headers(Any);
    } else if !headers.items.is_empty() {
        layer = layer.allow_headers(headers.items);
    }

    if expose.any {
        layer = layer.expose_headers(Any);
    } else if expose.items.is_empty() {
        layer = layer.expose_headers(default_expose_headers());
    } else {
        layer = layer.expose_headers(expose.items);
    }

    if cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    if let Some(secs) = cors.max_age_secs
        && secs > 0
    {
        layer = layer.max_age(Duration::from_secs(secs));
    }

    Some(layer)
}

/// 解析后的配置列表；`any` 表示出现了 "*"
struct Parsed<T> {
    any: bool,
    items: Vec<T>,
}

fn parse_list<T>(label: &str, values: &[String], parse: impl Fn(&str) -> Option<T>) -> Parsed<T> {
    let mut out = Parsed {
        any: false,
        items: Vec::new(),
    };
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if value == "*" {
            out.any = true;
            continue;
        }
        match parse(value) {
            Some(item) => out.items.push(item),
            None => tracing::warn!("CORS {} 含无效值: {}", label, value),
        }
    }
    out
}

fn parse_header_name(value: &str) -> Option<HeaderName> {
    HeaderName::from_bytes(value.to_ascii_lowercase().as_bytes()).ok()
}
