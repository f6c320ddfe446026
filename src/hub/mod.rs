//! 服务端在线状态中心
//!
//! 负责广播 connect/disconnect 消息、给新观看者发送快照，并由唯一的协调任务
//! 把同样的消息应用到服务端自己的标记面板上。
mod session;
mod viewer;

pub use session::SessionTracker;
pub use viewer::run_viewer;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};

use crate::error::AppError;
use crate::geo::GeoFix;
use crate::presence::{
    Coordinate, LocationKey, Marker, MarkerBoard, Reconciler, UserId, WireMessage, render_changes,
};

#[derive(Debug, Clone)]
struct VisitedLocation {
    coordinate: Coordinate,
    city: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Clone)]
struct LiveUser {
    key: LocationKey,
    coordinate: Coordinate,
    city: Option<String>,
    country: Option<String>,
    connected_at: i64,
}

#[derive(Debug, Default)]
struct Roster {
    visited: BTreeMap<LocationKey, VisitedLocation>,
    live: HashMap<UserId, LiveUser>,
    sessions: SessionTracker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub active_viewers: usize,
    pub live_users: usize,
    pub visited_locations: usize,
}

const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(5);

enum HubCommand {
    Apply(String),
    Flush(oneshot::Sender<()>),
}

pub struct PresenceHub {
    broadcast: broadcast::Sender<String>,
    inbox: mpsc::UnboundedSender<HubCommand>,
    roster: Mutex<Roster>,
    board: Arc<RwLock<MarkerBoard>>,
    session_ttl: Duration,
}

impl PresenceHub {
    /// 创建中心并启动协调任务和会话清理任务，需要在 tokio 运行时内调用
    pub fn start(broadcast_capacity: usize, session_ttl: Duration) -> Arc<Self> {
        let (broadcast, _) = broadcast::channel(broadcast_capacity.max(1));
        let (inbox, commands) = mpsc::unbounded_channel();
        let board = Arc::new(RwLock::new(MarkerBoard::new()));

        tokio::spawn(run_reconciler(commands, board.clone()));

        let hub = Arc::new(Self {
            broadcast,
            inbox,
            roster: Mutex::new(Roster::default()),
            board,
            session_ttl,
        });
        tokio::spawn(run_session_pruner(Arc::downgrade(&hub)));
        hub
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast.subscribe()
    }

    fn publish(&self, message: &WireMessage) -> Result<(), AppError> {
        let text = message.to_text()?;
        self.inbox
            .send(HubCommand::Apply(text.clone()))
            .map_err(|_| AppError::HubUnavailable)?;
        // 没有订阅者时发送失败是正常的
        let _ = self.broadcast.send(text);
        Ok(())
    }

    /// 记录用户上线并广播 connect
    pub async fn connect(&self, user: &UserId, fix: &GeoFix) -> Result<LocationKey, AppError> {
        let (key, _) = fix.location();
        let live = LiveUser {
            key: key.clone(),
            coordinate: fix.coordinate,
            city: fix.city.clone(),
            country: fix.country.clone(),
            connected_at: chrono::Utc::now().timestamp(),
        };

        let message = {
            let mut roster = self.roster.lock().await;
            if !roster.visited.contains_key(&key) {
                tracing::info!("New visited location: {}", key);
                roster.visited.insert(
                    key.clone(),
                    VisitedLocation {
                        coordinate: fix.coordinate,
                        city: fix.city.clone(),
                        country: fix.country.clone(),
                    },
                );
            }
            let message = live.to_wire(user);
            roster.live.insert(user.clone(), live);
            // 持锁发布，保证广播顺序与名单变更顺序一致
            self.publish(&message)?;
            message
        };

        tracing::debug!("Published {:?}", message);
        Ok(key)
    }

    /// 用户下线；不在名单里的用户直接忽略
    pub async fn disconnect(&self, user: &UserId) -> Result<Option<LocationKey>, AppError> {
        let mut roster = self.roster.lock().await;
        let Some(live) = roster.live.remove(user) else {
            return Ok(None);
        };

        self.publish(&WireMessage::Disconnect {
            id: user.clone(),
            key: Some(live.key.clone()),
        })?;
        Ok(Some(live.key))
    }

    /// 新观看者的初始快照：先发全部历史位置，再发当前在线用户
    pub async fn snapshot(&self) -> Vec<WireMessage> {
        let roster = self.roster.lock().await;
        let past = roster.visited.iter().map(|(key, visited)| WireMessage::Past {
            key: key.clone(),
            lat: visited.coordinate.lat,
            lng: visited.coordinate.lng,
            city: visited.city.clone(),
            country: visited.country.clone(),
        });
        let live = roster.live.iter().map(|(user, live)| live.to_wire(user));
        past.chain(live).collect()
    }

    pub async fn open_session(&self, session_id: &str) -> usize {
        let mut roster = self.roster.lock().await;
        roster.sessions.open(session_id, chrono::Utc::now().timestamp());
        roster.sessions.active()
    }

    pub async fn touch_session(&self, session_id: &str) {
        let mut roster = self.roster.lock().await;
        roster.sessions.touch(session_id, chrono::Utc::now().timestamp());
    }

    pub async fn close_session(&self, session_id: &str) -> usize {
        let mut roster = self.roster.lock().await;
        if roster.sessions.close(session_id) {
            tracing::debug!("Session {} closed its last connection", session_id);
        }
        roster.sessions.active()
    }

    /// 清理超过 session_ttl 没有活动的会话，返回清理的数量
    pub async fn prune_sessions(&self, now: i64) -> usize {
        let ttl = i64::try_from(self.session_ttl.as_secs()).unwrap_or(i64::MAX);
        let mut roster = self.roster.lock().await;
        let removed = roster.sessions.prune(now, ttl);
        if removed > 0 {
            tracing::info!(
                "Pruned {} stale sessions, active viewers = {}",
                removed,
                roster.sessions.active()
            );
        }
        removed
    }

    pub async fn stats(&self) -> HubStats {
        let roster = self.roster.lock().await;
        HubStats {
            active_viewers: roster.sessions.active(),
            live_users: roster.live.len(),
            visited_locations: roster.visited.len(),
        }
    }

    /// 等待已发布的消息全部应用到标记面板
    pub async fn flush(&self) -> Result<(), AppError> {
        let (done, wait) = oneshot::channel();
        self.inbox
            .send(HubCommand::Flush(done))
            .map_err(|_| AppError::HubUnavailable)?;
        wait.await.map_err(|_| AppError::HubUnavailable)
    }

    pub async fn markers(&self) -> Result<Vec<Marker>, AppError> {
        self.flush().await?;
        Ok(self.board.read().await.snapshot())
    }
}

impl LiveUser {
    fn to_wire(&self, user: &UserId) -> WireMessage {
        WireMessage::Connect {
            id: user.clone(),
            key: self.key.clone(),
            lat: self.coordinate.lat,
            lng: self.coordinate.lng,
            city: self.city.clone(),
            country: self.country.clone(),
            connected_at: self.connected_at,
        }
    }
}

// 中心被释放后任务自行退出
async fn run_session_pruner(hub: Weak<PresenceHub>) {
    let mut ticker = tokio::time::interval(SESSION_PRUNE_INTERVAL);

    loop {
        ticker.tick().await;
        let Some(hub) = hub.upgrade() else {
            break;
        };
        hub.prune_sessions(chrono::Utc::now().timestamp()).await;
    }
}

// 协调器只存在于这个任务里，消息严格按到达顺序逐条应用
async fn run_reconciler(
    mut commands: mpsc::UnboundedReceiver<HubCommand>,
    board: Arc<RwLock<MarkerBoard>>,
) {
    let mut reconciler = Reconciler::new();

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Apply(text) => {
                let changed = reconciler.apply_text(&text);
                if changed.is_empty() {
                    continue;
                }
                let mut board = board.write().await;
                let rendered = render_changes(reconciler.registry(), &changed, &mut *board);
                tracing::debug!("Redrew {} of {} changed locations", rendered, changed.len());
            }
            HubCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::info!("Presence reconciler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::render::{ACTIVE_STYLE, PAST_STYLE};

    const SESSION_TTL: Duration = Duration::from_secs(15);

    fn fix(city: &str, lat: f64, lng: f64) -> GeoFix {
        GeoFix {
            coordinate: Coordinate::new(lat, lng),
            city: Some(city.to_string()),
            country: Some("CH".to_string()),
        }
    }

    #[tokio::test]
    async fn connect_and_disconnect_drive_the_board() {
        let hub = PresenceHub::start(16, SESSION_TTL);
        let user = UserId::from("u1");

        let key = hub.connect(&user, &fix("Bern", 46.95, 7.45)).await.unwrap();
        assert_eq!(key.as_str(), "Bern, CH");

        let markers = hub.markers().await.unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].style, ACTIVE_STYLE);

        assert_eq!(hub.disconnect(&user).await.unwrap(), Some(key));
        let markers = hub.markers().await.unwrap();
        assert_eq!(markers[0].style, PAST_STYLE);
        assert!(markers[0].popup.contains("Visited before"));
    }

    #[tokio::test]
    async fn snapshot_lists_past_before_live() {
        let hub = PresenceHub::start(16, SESSION_TTL);
        hub.connect(&UserId::from("u1"), &fix("Bern", 46.95, 7.45)).await.unwrap();
        hub.connect(&UserId::from("u2"), &fix("Zurich", 47.37, 8.54)).await.unwrap();
        hub.disconnect(&UserId::from("u1")).await.unwrap();

        let snapshot = hub.snapshot().await;

        assert_eq!(snapshot.len(), 3);
        assert!(matches!(snapshot[0], WireMessage::Past { ref key, .. } if key.as_str() == "Bern, CH"));
        assert!(matches!(snapshot[1], WireMessage::Past { ref key, .. } if key.as_str() == "Zurich, CH"));
        assert!(matches!(snapshot[2], WireMessage::Connect { ref id, .. } if id.as_str() == "u2"));
    }

    #[tokio::test]
    async fn subscribers_receive_broadcasts() {
        let hub = PresenceHub::start(16, SESSION_TTL);
        let mut rx = hub.subscribe();

        hub.connect(&UserId::from("u1"), &fix("Bern", 46.95, 7.45)).await.unwrap();
        hub.disconnect(&UserId::from("u1")).await.unwrap();

        let connect: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let disconnect: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(connect["type"], "connect");
        assert_eq!(disconnect["type"], "disconnect");
        assert_eq!(disconnect["key"], "Bern, CH");
    }

    #[tokio::test]
    async fn unknown_user_disconnect_publishes_nothing() {
        let hub = PresenceHub::start(16, SESSION_TTL);
        let mut rx = hub.subscribe();

        assert_eq!(hub.disconnect(&UserId::from("ghost")).await.unwrap(), None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stats_count_sessions_once() {
        let hub = PresenceHub::start(16, SESSION_TTL);
        hub.open_session("s1").await;
        hub.open_session("s1").await;
        hub.open_session("s2").await;
        hub.connect(&UserId::from("u1"), &fix("Bern", 46.95, 7.45)).await.unwrap();

        assert_eq!(
            hub.stats().await,
            HubStats {
                active_viewers: 2,
                live_users: 1,
                visited_locations: 1,
            }
        );
        assert_eq!(hub.close_session("s1").await, 2);
        assert_eq!(hub.close_session("s1").await, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_pruned() {
        let hub = PresenceHub::start(16, SESSION_TTL);
        let opened_at = chrono::Utc::now().timestamp();
        hub.open_session("dead-tab").await;
        hub.open_session("live-tab").await;
        hub.touch_session("live-tab").await;

        assert_eq!(hub.prune_sessions(opened_at).await, 0);
        assert_eq!(hub.stats().await.active_viewers, 2);

        // 远超 TTL 之后两个会话都没有新活动
        assert_eq!(hub.prune_sessions(opened_at + 3600).await, 2);
        assert_eq!(hub.stats().await.active_viewers, 0);
        assert_eq!(hub.close_session("dead-tab").await, 0);
    }
}
