use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::model::{MAX_SESSION_ID_LEN, MapSocketQuery, MarkersResponse};
use crate::{
    AppState,
    error::AppError,
    geo::client_ip,
    hub::{HubStats, run_viewer},
    utils::{ApiResponse, success_to_api_response},
};

// 地图观看者的 WebSocket 入口
pub async fn map_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<MapSocketQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, AppError> {
    let session_id = match query.session_id() {
        Some(id) if id.len() > MAX_SESSION_ID_LEN => {
            return Err(AppError::Validation(format!(
                "session_id must be at most {} characters",
                MAX_SESSION_ID_LEN
            )));
        }
        Some(id) => id.to_string(),
        None => Uuid::new_v4().to_string(),
    };

    let ip = client_ip(&headers, Some(addr));
    let hub = state.hub.clone();
    let geo = state.geo.clone();
    let ping_interval = state.config.ping_interval();

    Ok(ws
        .on_upgrade(move |socket| run_viewer(socket, hub, geo, ip, session_id, ping_interval))
        .into_response())
}

// 当前标记面板
pub async fn get_markers(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<MarkersResponse>>, AppError> {
    let markers = state.hub.markers().await?;
    Ok(success_to_api_response(MarkersResponse::from(markers)))
}

pub async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<HubStats>> {
    success_to_api_response(state.hub.stats().await)
}
