//! 实时聊天相关的事件
//!
//! 客户端只会上报输入状态事件；枢纽会把它附上发送者后转发给房间里的其他用户。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{RoomId, UserId};

/// 输入状态事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingKind {
    TypingStart,
    TypingStop,
}

impl TypingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypingKind::TypingStart => "typing_start",
            TypingKind::TypingStop => "typing_stop",
        }
    }
}

/// 客户端上行事件
///
/// 线上格式：`{"type": "typing_start" | "typing_stop", "chat_room_id": <id>}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEvent {
    #[serde(rename = "type")]
    pub kind: TypingKind,
    pub chat_room_id: RoomId,
}

impl ClientEvent {
    /// 从原始帧解码
    pub fn decode(raw: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(raw).map_err(|err| DomainError::malformed_frame(err.to_string()))
    }

    /// 附上发送者，生成要广播的事件
    pub fn attribute_to(self, user_id: UserId) -> TypingBroadcast {
        TypingBroadcast {
            kind: self.kind,
            chat_room_id: self.chat_room_id,
            user_id,
        }
    }
}

/// 转发给房间其他成员的输入状态事件
///
/// 线上格式：`{"type": ..., "chat_room_id": ..., "user_id": <sender>}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingBroadcast {
    #[serde(rename = "type")]
    pub kind: TypingKind,
    pub chat_room_id: RoomId,
    pub user_id: UserId,
}
