use std::collections::HashMap;

#[derive(Debug, Clone)]
struct SessionEntry {
    connections: usize,
    last_seen: i64,
}

/// 按 session_id 计数的观看者会话，同一会话开多个标签页只算一个观看者
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<String, SessionEntry>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 true 表示这是该会话的第一条连接
    pub fn open(&mut self, session_id: &str, now: i64) -> bool {
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert(SessionEntry {
                connections: 0,
                last_seen: now,
            });
        entry.connections += 1;
        entry.last_seen = now;
        entry.connections == 1
    }

    pub fn touch(&mut self, session_id: &str, now: i64) {
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.last_seen = now;
        }
    }

    /// 返回 true 表示会话的最后一条连接已关闭
    pub fn close(&mut self, session_id: &str) -> bool {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return false;
        };

        if entry.connections > 1 {
            entry.connections -= 1;
            return false;
        }

        self.sessions.remove(session_id);
        true
    }

    /// 移除超过 ttl_secs 没有任何活动的会话，返回移除的数量
    pub fn prune(&mut self, now: i64, ttl_secs: i64) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| now.saturating_sub(entry.last_seen) <= ttl_secs);
        before - self.sessions.len()
    }

    pub fn last_seen(&self, session_id: &str) -> Option<i64> {
        self.sessions.get(session_id).map(|e| e.last_seen)
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }
}
