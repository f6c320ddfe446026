use serde::{Deserialize, Serialize};

use crate::presence::Marker;

// session_id 由浏览器本地存储生成，长度有上限
pub(crate) const MAX_SESSION_ID_LEN: usize = 128;

/// WebSocket 连接参数
#[derive(Debug, Deserialize)]
pub struct MapSocketQuery {
    pub session_id: Option<String>,
}

impl MapSocketQuery {
    /// 缺失或为空时返回 None，由调用方生成新的会话ID
    pub fn session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct MarkersResponse {
    pub count: usize,
    pub markers: Vec<Marker>,
}

impl From<Vec<Marker>> for MarkersResponse {
    fn from(markers: Vec<Marker>) -> Self {
        Self {
            count: markers.len(),
            markers,
        }
    }
}
