use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use presence_map::{
    AppState, config::Config, geo::GeoLocator, hub::PresenceHub, middleware::RateLimiter,
    router::create_router,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置限流器，没有 Redis 时不限流
    let redis_client = config.redis_url.as_deref().map(|url| {
        redis::Client::open(url).expect("Failed to create Redis client")
    });
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));
    if !rate_limiter.is_enabled() {
        tracing::warn!("REDIS_URL not set, rate limiting disabled");
    }

    let geo = GeoLocator::new(&config.geo_lookup_url).expect("Failed to build geo lookup client");

    // 设置应用状态
    let state = AppState {
        hub: PresenceHub::start(config.broadcast_capacity, config.session_ttl()),
        config: config.clone(),
        geo,
    };

    let app = create_router(state.clone(), rate_limiter);

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
