use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{
    config::Config,
    geo::client_ip,
    utils::{error_codes, error_to_api_response},
};

/// 按客户端IP计数的限流器，未配置 Redis 时直接放行
#[derive(Clone)]
pub struct RateLimiter {
    redis: Option<Arc<redis::Client>>,
    config: Arc<Config>,
}

// Redis 的 EXPIRE 参数是有符号整数
fn expire_secs(config: &Config) -> i64 {
    i64::try_from(config.rate_limit_window().as_secs()).unwrap_or(i64::MAX)
}

impl RateLimiter {
    pub fn new(redis: Option<redis::Client>, config: Config) -> Self {
        Self {
            redis: redis.map(Arc::new),
            config: Arc::new(config),
        }
    }

    pub fn disabled(config: Config) -> Self {
        Self::new(None, config)
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }

    pub async fn check_rate_limit(
        self: Arc<Self>,
        req: Request<Body>,
        next: Next,
    ) -> Result<Response, StatusCode> {
        let Some(redis) = self.redis.as_ref() else {
            return Ok(next.run(req).await);
        };

        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        let ip = client_ip(req.headers(), peer)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::debug!("rate limit check for ip: {}", ip);

        let key = format!("presence:rate_limit:{}", ip);
        let mut conn = redis
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                tracing::error!("Redis connection failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

        // INCR + EXPIRE 实现固定窗口计数
        let count: i64 = conn
            .incr(&key, 1)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if count == 1 {
            let _: () = conn
                .expire(&key, expire_secs(&self.config))
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        if count > i64::from(self.config.rate_limit_requests) {
            tracing::warn!("Rate limit exceeded for {} ({} requests)", ip, count);
            return Ok((
                StatusCode::TOO_MANY_REQUESTS,
                error_to_api_response::<()>(
                    error_codes::RATE_LIMIT,
                    format!(
                        "Too many requests, retry in {} seconds",
                        self.config.rate_limit_window().as_secs()
                    ),
                ),
            )
                .into_response());
        }

        Ok(next.run(req).await)
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    limiter.check_rate_limit(req, next).await
}
