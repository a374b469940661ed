use std::collections::HashSet;

use domain::{RoomId, UserId};
use serde::{Deserialize, Serialize};

/// 打开/关闭房间的请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMemberPayload {
    pub user_id: UserId,
}

/// 服务层在消息落库后提交的扇出请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub sender_id: UserId,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPresenceDto {
    pub room_id: RoomId,
    /// 按用户 ID 升序
    pub online_users: Vec<UserId>,
}

impl RoomPresenceDto {
    pub fn new(room_id: RoomId, users: HashSet<UserId>) -> Self {
        let mut online_users: Vec<_> = users.into_iter().collect();
        online_users.sort_unstable();
        Self {
            room_id,
            online_users,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresenceDto {
    pub user_id: UserId,
    pub online: bool,
    pub connections: usize,
}
