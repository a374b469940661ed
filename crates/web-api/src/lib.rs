//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 接入交给枢纽管理，HTTP 接口暴露房间打开/关闭、
//! 服务层扇出以及在线状态查询。

mod dto;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use dto::{BroadcastPayload, RoomMemberPayload, RoomPresenceDto, UserPresenceDto};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
