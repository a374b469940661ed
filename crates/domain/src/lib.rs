//! 实时聊天枢纽的核心领域模型
//!
//! 包含用户、房间、连接标识，客户端上下行事件，以及下行帧类型。

pub mod errors;
pub mod events;
pub mod frame;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use frame::OutboundFrame;
pub use value_objects::{ConnectionId, RoomId, UserId};
