use std::collections::BTreeSet;

use serde_json::Value;

use super::event::{Discard, PresenceEvent};
use super::key::{Coordinate, LocationKey, UserId};
use super::registry::LocationRegistry;
use super::user_index::UserIndex;

/// 需要重绘的位置键，按键排序
pub type ChangedKeys = BTreeSet<LocationKey>;

/// 在线状态协调器
///
/// 独占注册表和用户索引，按到达顺序逐个应用事件。每个事件在应用前已完成校验，
/// 应用过程本身不会失败，所以外部永远看不到一半生效的状态。
#[derive(Debug, Default)]
pub struct Reconciler {
    registry: LocationRegistry,
    users: UserIndex,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &LocationRegistry {
        &self.registry
    }

    pub fn users(&self) -> &UserIndex {
        &self.users
    }

    /// 解析并应用一条文本消息；无法识别或格式错误的消息被丢弃
    pub fn apply_text(&mut self, text: &str) -> ChangedKeys {
        self.apply_decoded(PresenceEvent::decode_text(text))
    }

    pub fn apply_value(&mut self, value: &Value) -> ChangedKeys {
        self.apply_decoded(PresenceEvent::decode(value))
    }

    fn apply_decoded(&mut self, decoded: Result<PresenceEvent, Discard>) -> ChangedKeys {
        match decoded {
            Ok(event) => self.apply(event),
            Err(Discard::UnknownKind(kind)) => {
                tracing::debug!("Ignoring presence event of unknown kind: {}", kind);
                ChangedKeys::new()
            }
            Err(Discard::Malformed(e)) => {
                tracing::warn!("Discarding malformed presence event: {}", e);
                ChangedKeys::new()
            }
        }
    }

    pub fn apply(&mut self, event: PresenceEvent) -> ChangedKeys {
        match event {
            PresenceEvent::Past {
                key,
                coordinate,
                label,
            } => self.apply_past(key, coordinate, label.as_deref()),
            PresenceEvent::Connect {
                user,
                key,
                coordinate,
                label,
            } => self.apply_connect(user, key, coordinate, label.as_deref()),
            PresenceEvent::Disconnect { user, key } => self.apply_disconnect(&user, key),
        }
    }

    fn apply_past(&mut self, key: LocationKey, coordinate: Coordinate, label: Option<&str>) -> ChangedKeys {
        self.registry.ensure(&key, coordinate, label);
        // 用户索引里指向该键的条目保持不动，等各自的 disconnect 到达
        let cleared = self.registry.mark_all_past(&key);
        if !cleared.is_empty() {
            tracing::debug!("Past event for {} cleared {} active users", key, cleared.len());
        }
        ChangedKeys::from([key])
    }

    fn apply_connect(
        &mut self,
        user: UserId,
        key: LocationKey,
        coordinate: Coordinate,
        label: Option<&str>,
    ) -> ChangedKeys {
        let mut changed = ChangedKeys::new();

        if let Some(prev) = self.users.get(&user).filter(|prev| **prev != key).cloned() {
            self.registry.remove_active(&prev, &user);
            tracing::debug!("User {} moved from {} to {}", user, prev, key);
            changed.insert(prev);
        }

        self.registry.ensure(&key, coordinate, label);
        self.registry.add_active(&key, &user);
        self.users.set(user, key.clone());
        changed.insert(key);
        changed
    }

    fn apply_disconnect(&mut self, user: &UserId, key: Option<LocationKey>) -> ChangedKeys {
        let effective = key.or_else(|| self.users.get(user).cloned());

        let Some(effective) = effective else {
            tracing::debug!("Disconnect for untracked user {} ignored", user);
            return ChangedKeys::new();
        };

        self.registry.remove_active(&effective, user);
        if let Some(indexed) = self.users.remove(user) {
            // 显式键与索引不一致时，索引指向的位置也要清掉该用户
            if indexed != effective && self.registry.remove_active(&indexed, user) {
                return ChangedKeys::from([effective, indexed]);
            }
        }
        ChangedKeys::from([effective])
    }
}
