use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub geo_lookup_url: String,
    pub ping_interval_secs: u64,
    pub session_ttl_secs: u64,
    pub broadcast_capacity: usize,
    pub redis_url: Option<String>,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "::".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            geo_lookup_url: "http://ip-api.com/json".into(),
            ping_interval_secs: 20,
            session_ttl_secs: 45,
            broadcast_capacity: 100,
            redis_url: None,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
        }
    }
}

// 未设置时用默认值，非 UTF-8 的值仍然报错
fn var_or(name: &str, default: &str) -> Result<String, env::VarError> {
    match env::var(name) {
        Ok(value) => Ok(value),
        Err(env::VarError::NotPresent) => Ok(default.to_string()),
        Err(e) => Err(e),
    }
}

fn optional_var(name: &str) -> Result<Option<String>, env::VarError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e),
    }
}

// 统一成 "/api" 形式；根路径返回空串
fn normalize_base_uri(uri: &str) -> String {
    let trimmed = uri.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let ping_interval = var_or("PING_INTERVAL", "20")?
            .trim_end_matches('s')
            .parse::<u64>()
            .unwrap_or(defaults.ping_interval_secs)
            .max(1);
        let session_ttl = var_or("SESSION_TTL", "45")?
            .trim_end_matches('s')
            .parse::<u64>()
            .unwrap_or(defaults.session_ttl_secs);

        Ok(Config {
            server_host: var_or("SERVER_HOST", &defaults.server_host)?,
            server_port: var_or("SERVER_PORT", "3000")?
                .parse()
                .unwrap_or(defaults.server_port),
            api_base_uri: normalize_base_uri(&var_or("API_BASE_URI", &defaults.api_base_uri)?),
            geo_lookup_url: var_or("GEO_LOOKUP_URL", &defaults.geo_lookup_url)?,
            ping_interval_secs: ping_interval,
            // 至少要覆盖一个心跳周期，否则在线的观看者会在两次 pong 之间被清理
            session_ttl_secs: session_ttl.max(ping_interval + 1),
            broadcast_capacity: var_or("BROADCAST_CAPACITY", "100")?
                .parse()
                .unwrap_or(defaults.broadcast_capacity),
            redis_url: optional_var("REDIS_URL")?,
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW", "60")?
                .parse()
                .unwrap_or(defaults.rate_limit_window_secs),
            rate_limit_requests: var_or("RATE_LIMIT_REQUESTS", "100")?
                .parse()
                .unwrap_or(defaults.rate_limit_requests),
        })
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}
