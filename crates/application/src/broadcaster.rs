use async_trait::async_trait;
use domain::{DomainError, OutboundFrame, RoomId, UserId};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast payload could not be encoded: {0}")]
    Encode(#[from] DomainError),
}

/// 服务层使用的实时扇出接口
///
/// 消息落库之后由服务层调用。投递是“发出即忘”：调用方拿不到任何
/// 单个接收方的成败结果，离线用户通过消息列表接口补齐。
#[async_trait]
pub trait MessageBroadcaster: Send + Sync {
    async fn broadcast(&self, room_id: RoomId, frame: OutboundFrame, sender_id: UserId);
}

/// 编码任意负载后广播，只有编码失败会返回错误
pub async fn broadcast_json<B, T>(
    broadcaster: &B,
    room_id: RoomId,
    payload: &T,
    sender_id: UserId,
) -> Result<(), BroadcastError>
where
    B: MessageBroadcaster + ?Sized,
    T: Serialize + ?Sized,
{
    let frame = OutboundFrame::json(payload)?;
    broadcaster.broadcast(room_id, frame, sender_id).await;
    Ok(())
}
