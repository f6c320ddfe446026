use std::sync::Arc;

use axum::{Router, routing::get};

use crate::{
    AppState,
    middleware::{RateLimiter, log_errors, rate_limit},
    routes,
};

// 地图相关的路由，WebSocket 入口单独限流
pub fn map_routes(rate_limiter: Arc<RateLimiter>) -> Router<AppState> {
    let socket = Router::new()
        .route("/ws/map", get(routes::map::map_socket))
        .layer(axum::middleware::from_fn_with_state(rate_limiter, rate_limit));

    Router::new()
        .route("/markers", get(routes::map::get_markers))
        .route("/stats", get(routes::map::get_stats))
        .merge(socket)
}

// 创建主路由
pub fn create_router(state: AppState, rate_limiter: Arc<RateLimiter>) -> Router {
    let base = state.config.api_base_uri.as_str();
    // axum 不允许在根路径 nest
    let router = if base.is_empty() {
        Router::new().merge(map_routes(rate_limiter))
    } else {
        Router::new().nest(base, map_routes(rate_limiter))
    };
    let router = router.layer(axum::middleware::from_fn(log_errors));

    // 开发模式下允许跨域
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    router.with_state(state)
}
