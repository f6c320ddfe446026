use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::PresenceHub;
use crate::geo::{GeoError, GeoFix, GeoLocator};
use crate::presence::UserId;

async fn locate(geo: &GeoLocator, ip: Option<IpAddr>) -> Option<GeoFix> {
    let ip = ip?;
    match geo.lookup(ip).await {
        Ok(fix) => Some(fix),
        Err(GeoError::PrivateAddress(_)) => {
            tracing::debug!("Skipping geo lookup for private IP: {}", ip);
            None
        }
        Err(e) => {
            tracing::warn!("Geo lookup failed for IP {}: {}", ip, e);
            None
        }
    }
}

/// 一个地图观看者连接的完整生命周期
pub async fn run_viewer(
    socket: WebSocket,
    hub: Arc<PresenceHub>,
    geo: GeoLocator,
    ip: Option<IpAddr>,
    session_id: String,
    ping_interval: Duration,
) {
    let (sender, receiver) = socket.split();
    serve_viewer(sender, receiver, &hub, &geo, ip, &session_id, ping_interval).await;
}

// 与具体的 WebSocket 解耦，发送端和接收端可以是任意的消息管道
async fn serve_viewer<S, R>(
    sender: S,
    receiver: R,
    hub: &PresenceHub,
    geo: &GeoLocator,
    ip: Option<IpAddr>,
    session_id: &str,
    ping_interval: Duration,
) where
    S: Sink<Message, Error = axum::Error> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let user = UserId::new(Uuid::new_v4().to_string());
    tracing::info!("New map viewer {} (session_id={}, ip={:?})", user, session_id, ip);

    // 先订阅再取快照：重复的消息可以被幂等地吸收，丢失的不行
    let updates = hub.subscribe();

    let mut placed = false;
    if let Some(fix) = locate(geo, ip).await {
        match hub.connect(&user, &fix).await {
            Ok(key) => {
                tracing::info!("Viewer {} placed at {}", user, key);
                placed = true;
            }
            Err(e) => tracing::error!("Failed to publish connect for {}: {}", user, e),
        }
    }

    let viewers = hub.open_session(session_id).await;
    tracing::info!("Viewer connected, active viewers = {} (session_id={})", viewers, session_id);

    if let Err(e) = pump(sender, receiver, updates, hub, session_id, ping_interval).await {
        tracing::debug!("Viewer socket ended with error (session_id={}): {}", session_id, e);
    }

    if placed {
        if let Err(e) = hub.disconnect(&user).await {
            tracing::error!("Failed to publish disconnect for {}: {}", user, e);
        }
    }

    let viewers = hub.close_session(session_id).await;
    tracing::info!("Viewer disconnected, active viewers = {} (session_id={})", viewers, session_id);
}

// 快照消息都是幂等的，重复发送不会造成重复计数
async fn send_snapshot<S>(sender: &mut S, hub: &PresenceHub) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    for message in hub.snapshot().await {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode snapshot message: {}", e);
                continue;
            }
        };
        sender.send(Message::Text(text.into())).await?;
    }
    Ok(())
}

async fn pump<S, R>(
    mut sender: S,
    mut receiver: R,
    mut updates: broadcast::Receiver<String>,
    hub: &PresenceHub,
    session_id: &str,
    ping_interval: Duration,
) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    send_snapshot(&mut sender, hub).await?;

    let mut ping = tokio::time::interval(ping_interval);
    // interval 的第一次 tick 立即完成
    ping.tick().await;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                sender.send(Message::Ping(Bytes::new())).await?;
            }

            update = updates.recv() => match update {
                Ok(text) => sender.send(Message::Text(text.into())).await?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Viewer lagged behind by {} messages (session_id={}), resending snapshot", skipped, session_id);
                    send_snapshot(&mut sender, hub).await?;
                }
                Err(RecvError::Closed) => return Ok(()),
            },

            incoming = receiver.next() => match incoming {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Ok(_)) => hub.touch_session(session_id).await,
                Some(Err(e)) => return Err(e),
            },
        }
    }
}
