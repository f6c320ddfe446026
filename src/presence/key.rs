use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 位置聚合键，同一个键下的用户视为同一地点
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationKey(String);

impl LocationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LocationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for LocationKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// 用户标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for UserId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// 经纬度坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// 派生键所需的位置属性
#[derive(Debug, Clone, Copy)]
pub struct LocationAttrs<'a> {
    pub city: Option<&'a str>,
    pub country: Option<&'a str>,
    pub coordinate: Coordinate,
}

/// 由位置属性派生聚合键和显示名称
///
/// 有城市时键为 `"{city}, {country}"`（无国家时只用城市），名称为城市；
/// 否则把坐标四舍五入到两位小数（远离零方向），键与名称都是 `"{lat},{lng}"`。
pub fn derive_key(attrs: LocationAttrs<'_>) -> (LocationKey, String) {
    let city = attrs.city.filter(|c| !c.is_empty());
    let country = attrs.country.filter(|c| !c.is_empty());

    if let Some(city) = city {
        let key = match country {
            Some(country) => format!("{}, {}", city, country),
            None => city.to_string(),
        };
        return (LocationKey(key), city.to_string());
    }

    let lat = round_coordinate(attrs.coordinate.lat);
    let lng = round_coordinate(attrs.coordinate.lng);
    let key = format!("{},{}", lat, lng);
    (LocationKey(key.clone()), key)
}

// 精确到小数点后两位，约1.1公里的网格
fn round_coordinate(value: f64) -> f64 {
    // 加 0.0 把 -0.0 归一成 0.0
    (value * 100.0).round() / 100.0 + 0.0
}
