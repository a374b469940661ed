use application::{broadcast_json, HubStats};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use domain::{RoomId, UserId};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::dto::{BroadcastPayload, RoomMemberPayload, RoomPresenceDto, UserPresenceDto};
use crate::ws_connection::WebSocketConnection;
use crate::{error::ApiError, state::AppState};

/// WebSocket连接查询参数
///
/// 用户身份由前置的会话层认证后写入，枢纽直接信任它。
#[derive(Debug, Deserialize)]
struct WebSocketQuery {
    user_id: UserId,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/join", post(join_room))
        .route("/rooms/{room_id}/leave", post(leave_room))
        .route("/rooms/{room_id}/broadcast", post(broadcast_to_room))
        .route("/rooms/{room_id}/online", get(room_online_users))
        .route("/users/{user_id}/online", get(user_online))
        .route("/hub/stats", get(hub_stats))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WebSocketQuery>,
) -> Response {
    let user_id = query.user_id;
    ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(socket, &state, user_id).run().await;
    })
}

async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(payload): Json<RoomMemberPayload>,
) -> Json<RoomPresenceDto> {
    state.hub.join_room(payload.user_id, room_id);
    Json(RoomPresenceDto::new(
        room_id,
        state.hub.online_users_in_room(room_id),
    ))
}

async fn leave_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(payload): Json<RoomMemberPayload>,
) -> Json<RoomPresenceDto> {
    state.hub.leave_room(payload.user_id, room_id);
    Json(RoomPresenceDto::new(
        room_id,
        state.hub.online_users_in_room(room_id),
    ))
}

/// 服务层在消息落库后调用，把消息实时推给打开房间的其他用户
async fn broadcast_to_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(body): Json<BroadcastPayload>,
) -> Result<StatusCode, ApiError> {
    if body.payload.is_null() {
        return Err(ApiError::bad_request("payload is required"));
    }

    broadcast_json(
        state.broadcaster.as_ref(),
        room_id,
        &body.payload,
        body.sender_id,
    )
    .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn room_online_users(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Json<RoomPresenceDto> {
    Json(RoomPresenceDto::new(
        room_id,
        state.hub.online_users_in_room(room_id),
    ))
}

async fn user_online(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<UserPresenceDto> {
    let connections = state.hub.connection_count(user_id);
    Json(UserPresenceDto {
        user_id,
        online: state.hub.is_online(user_id),
        connections,
    })
}

async fn hub_stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}
