use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::http::HeaderMap;
use serde::Deserialize;
use thiserror::Error;

use crate::presence::{Coordinate, LocationAttrs, LocationKey, derive_key};

// 按优先级检查的代理头
const FORWARDING_HEADERS: [&str; 4] = ["cf-connecting-ip", "x-real-ip", "x-forwarded-for", "forwarded"];

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("address {0} is private, skipping lookup")]
    PrivateAddress(IpAddr),
    #[error("geo lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geo lookup rejected: {0}")]
    Rejected(String),
    #[error("geo lookup response has no coordinates")]
    MissingCoordinates,
}

/// IP 定位结果
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFix {
    pub coordinate: Coordinate,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl GeoFix {
    /// 聚合键和显示名称
    pub fn location(&self) -> (LocationKey, String) {
        derive_key(LocationAttrs {
            city: self.city.as_deref(),
            country: self.country.as_deref(),
            coordinate: self.coordinate,
        })
    }
}

// ip-api 格式的响应
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl TryFrom<IpApiResponse> for GeoFix {
    type Error = GeoError;

    fn try_from(resp: IpApiResponse) -> Result<Self, Self::Error> {
        if resp.status.as_deref() == Some("fail") {
            return Err(GeoError::Rejected(
                resp.message.unwrap_or_else(|| "unknown reason".into()),
            ));
        }

        let (Some(lat), Some(lon)) = (resp.lat, resp.lon) else {
            return Err(GeoError::MissingCoordinates);
        };

        Ok(GeoFix {
            coordinate: Coordinate::new(lat, lon),
            city: resp.city.filter(|c| !c.is_empty()),
            country: resp.country.filter(|c| !c.is_empty()),
        })
    }
}

/// 通过外部 HTTP 服务把 IP 解析为地理位置
#[derive(Debug, Clone)]
pub struct GeoLocator {
    client: reqwest::Client,
    base_url: String,
}

impl GeoLocator {
    pub fn new(base_url: &str) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn lookup(&self, ip: IpAddr) -> Result<GeoFix, GeoError> {
        if is_private_ip(&ip) {
            return Err(GeoError::PrivateAddress(ip));
        }

        let url = format!("{}/{}", self.base_url, ip);
        let resp: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        GeoFix::try_from(resp)
    }
}

pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local() || v6.is_unspecified(),
    }
}

// 取 `Forwarded: for=1.2.3.4;proto=https` 或 `X-Forwarded-For: client, proxy` 中的第一个客户端地址
fn first_forwarded_addr(value: &str) -> Option<IpAddr> {
    let first = value.split(',').next()?.trim();
    let candidate = first
        .split(';')
        .find_map(|part| part.trim().strip_prefix("for="))
        .unwrap_or(first)
        .trim_matches('"');

    if let Ok(ip) = candidate.parse::<IpAddr>() {
        return Some(ip);
    }
    // 带端口或方括号的形式，例如 "[2001:db8::1]:4711" / "203.0.113.9:443"
    if let Ok(addr) = candidate.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    candidate
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

/// 从代理头里取出第一个公网地址
pub fn extract_real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    FORWARDING_HEADERS.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?;
        first_forwarded_addr(value).filter(|ip| !is_private_ip(ip))
    })
}

/// 代理头优先，否则使用连接的对端地址
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    extract_real_ip(headers).or_else(|| peer.map(|p| p.ip()))
}
