//! 领域事件定义
//!
//! 包含客户端通过 WebSocket 上报的事件，以及枢纽向房间广播的事件。

pub mod chat_event;

// 重新导出事件类型
pub use chat_event::*;
