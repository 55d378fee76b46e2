use axum::http::HeaderValue;
use instaquote_core::config::ServerConfig;
use tower_http::cors::{Any, CorsLayer};

/// The widget is embedded on arbitrary customer sites, so an unset or
/// unparseable origin list falls back to a wildcard.
pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins = config.cors_allowed_origins.as_deref().map(allowed_origins).unwrap_or_default();

    if origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any)
    } else {
        CorsLayer::new().allow_origin(origins).allow_headers(Any).allow_methods(Any)
    }
}

fn allowed_origins(list: &str) -> Vec<HeaderValue> {
    list.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse().ok())
        .collect()
}
