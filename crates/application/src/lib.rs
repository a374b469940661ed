//! 应用层实现。
//!
//! 这里提供实时聊天枢纽本身：连接执行体、单连接限流、会话注册表与房间索引，
//! 以及服务层用来做实时扇出的广播接口。

pub mod broadcaster;
pub mod clock;
pub mod connection;
pub mod hub;
pub mod rate_limiter;

pub use broadcaster::{broadcast_json, BroadcastError, MessageBroadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{ConnectionActor, ConnectionHandle, EnqueueError, InboundError, OutboundQueue};
pub use hub::{ChatHub, HubStats};
pub use rate_limiter::RateGate;
