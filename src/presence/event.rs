use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::key::{Coordinate, LocationAttrs, LocationKey, UserId, derive_key};

/// 校验通过的在线状态事件
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// 历史访问位置，永远不显示在线人数
    Past {
        key: LocationKey,
        coordinate: Coordinate,
        label: Option<String>,
    },
    Connect {
        user: UserId,
        key: LocationKey,
        coordinate: Coordinate,
        label: Option<String>,
    },
    Disconnect {
        user: UserId,
        key: Option<LocationKey>,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("`type` must be a string")]
    InvalidKind,
    #[error("invalid `{kind}` message: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
    #[error("`{kind}` message has an empty `{field}`")]
    EmptyField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("`{kind}` message has coordinates out of range ({lat}, {lng})")]
    CoordinateOutOfRange { kind: &'static str, lat: f64, lng: f64 },
}

/// 事件被丢弃的原因，都不是致命错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Discard {
    #[error("malformed event: {0}")]
    Malformed(#[from] DecodeError),
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
}

// 用户ID可以是字符串或数字
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for UserId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => UserId::new(text),
            RawId::Number(number) => UserId::new(number.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct PastPayload {
    key: String,
    lat: f64,
    lng: f64,
    #[serde(default)]
    city: Option<String>,
}

#[derive(Deserialize)]
struct ConnectPayload {
    id: RawId,
    key: String,
    lat: f64,
    lng: f64,
    #[serde(default)]
    city: Option<String>,
}

#[derive(Deserialize)]
struct DisconnectPayload {
    id: RawId,
    #[serde(default)]
    key: Option<String>,
}

// 没有 `type` 字段的旧格式，按 connect 处理
#[derive(Deserialize)]
struct LegacyPayload {
    id: RawId,
    lat: f64,
    lng: f64,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl PresenceEvent {
    pub fn decode_text(text: &str) -> Result<Self, Discard> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        Self::decode(&value)
    }

    /// 在边界处完成全部校验，失败时不会构造出半成品事件
    pub fn decode(value: &Value) -> Result<Self, Discard> {
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

        match object.get("type") {
            None | Some(Value::Null) => decode_legacy(value),
            Some(Value::String(kind)) => match kind.as_str() {
                "past" => decode_past(value),
                "connect" => decode_connect(value),
                "disconnect" => decode_disconnect(value),
                other => Err(Discard::UnknownKind(other.to_string())),
            },
            Some(_) => Err(DecodeError::InvalidKind.into()),
        }
    }

    pub fn user(&self) -> Option<&UserId> {
        match self {
            PresenceEvent::Past { .. } => None,
            PresenceEvent::Connect { user, .. } | PresenceEvent::Disconnect { user, .. } => Some(user),
        }
    }
}

fn payload<'a, T: Deserialize<'a>>(kind: &'static str, value: &'a Value) -> Result<T, Discard> {
    T::deserialize(value).map_err(|e| {
        DecodeError::InvalidPayload {
            kind,
            reason: e.to_string(),
        }
        .into()
    })
}

fn required_key(kind: &'static str, key: String) -> Result<LocationKey, Discard> {
    if key.is_empty() {
        return Err(DecodeError::EmptyField { kind, field: "key" }.into());
    }
    Ok(LocationKey::new(key))
}

// 纬度 [-90, 90]，经度 [-180, 180]
fn coordinate(kind: &'static str, lat: f64, lng: f64) -> Result<Coordinate, Discard> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(DecodeError::CoordinateOutOfRange { kind, lat, lng }.into());
    }
    Ok(Coordinate::new(lat, lng))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn decode_past(value: &Value) -> Result<PresenceEvent, Discard> {
    let p: PastPayload = payload("past", value)?;
    Ok(PresenceEvent::Past {
        key: required_key("past", p.key)?,
        coordinate: coordinate("past", p.lat, p.lng)?,
        label: non_empty(p.city),
    })
}

fn decode_connect(value: &Value) -> Result<PresenceEvent, Discard> {
    let p: ConnectPayload = payload("connect", value)?;
    Ok(PresenceEvent::Connect {
        user: p.id.into(),
        key: required_key("connect", p.key)?,
        coordinate: coordinate("connect", p.lat, p.lng)?,
        label: non_empty(p.city),
    })
}

fn decode_disconnect(value: &Value) -> Result<PresenceEvent, Discard> {
    let p: DisconnectPayload = payload("disconnect", value)?;
    Ok(PresenceEvent::Disconnect {
        user: p.id.into(),
        key: non_empty(p.key).map(LocationKey::new),
    })
}

fn decode_legacy(value: &Value) -> Result<PresenceEvent, Discard> {
    let p: LegacyPayload = payload("legacy", value)?;
    let coordinate = coordinate("legacy", p.lat, p.lng)?;

    let (key, label) = match non_empty(p.key) {
        Some(key) => (LocationKey::new(key), non_empty(p.city)),
        None => {
            let (key, label) = derive_key(LocationAttrs {
                city: p.city.as_deref(),
                country: p.country.as_deref(),
                coordinate,
            });
            (key, Some(label))
        }
    };

    Ok(PresenceEvent::Connect {
        user: p.id.into(),
        key,
        coordinate,
        label,
    })
}

/// 服务端广播给地图客户端的消息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    Past {
        key: LocationKey,
        lat: f64,
        lng: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        city: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        country: Option<String>,
    },
    Connect {
        id: UserId,
        key: LocationKey,
        lat: f64,
        lng: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        city: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        country: Option<String>,
        connected_at: i64,
    },
    Disconnect {
        id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<LocationKey>,
    },
}

impl WireMessage {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
