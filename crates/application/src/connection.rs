//! 单个物理连接的抽象
//!
//! 一个 WebSocket 对应一对对象：
//! - [`ConnectionHandle`]：下行队列与房间集合，枢纽持有它的非独占引用用于分发
//! - [`ConnectionActor`]：由传输层读任务独占，负责限流、解码和转发上行事件
//!
//! 房间集合会被枢纽（加入/离开/清理）和读任务（校验上行事件）同时访问，
//! 因此由每个连接自己的锁保护。加锁顺序固定为：先枢纽锁，后连接锁。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use domain::{ClientEvent, ConnectionId, DomainError, OutboundFrame, RoomId, UserId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::hub::ChatHub;
use crate::rate_limiter::RateGate;

/// 下行队列的接收端，由传输层写任务持有
pub type OutboundQueue = mpsc::Receiver<OutboundFrame>;

/// 下行入队失败
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

/// 上行消息被丢弃的原因
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InboundError {
    #[error("rate limit exceeded: {current}/{max} messages in window")]
    RateLimited { current: u32, max: u32 },

    #[error("malformed frame: {0}")]
    Malformed(DomainError),

    #[error("connection has not joined room {0}")]
    NotInRoom(RoomId),

    #[error("connection is already unregistered")]
    Disconnected,
}

/// 枢纽眼中的连接
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    outbound: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    rooms: Mutex<HashSet<RoomId>>,
    closed: CancellationToken,
    unregistered: AtomicBool,
    eviction_scheduled: AtomicBool,
}

impl ConnectionHandle {
    /// 创建连接及其容量受限的下行队列
    pub fn new(user_id: UserId, capacity: usize) -> (Arc<Self>, OutboundQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            outbound: Mutex::new(Some(sender)),
            rooms: Mutex::new(HashSet::new()),
            closed: CancellationToken::new(),
            unregistered: AtomicBool::new(false),
            eviction_scheduled: AtomicBool::new(false),
        });
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// 非阻塞入队，队列满或已关闭时立即返回错误
    pub fn enqueue(&self, frame: OutboundFrame) -> Result<(), EnqueueError> {
        let outbound = lock(&self.outbound);
        let sender = outbound.as_ref().ok_or(EnqueueError::Closed)?;
        sender.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    pub fn is_in_room(&self, room_id: RoomId) -> bool {
        lock(&self.rooms).contains(&room_id)
    }

    /// 当前所在房间的快照
    pub fn rooms(&self) -> HashSet<RoomId> {
        lock(&self.rooms).clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.outbound).is_none()
    }

    /// 注销时触发的信号，传输层据此立即拆除 socket，而不是继续排空积压
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub(crate) fn add_room(&self, room_id: RoomId) {
        lock(&self.rooms).insert(room_id);
    }

    pub(crate) fn remove_room(&self, room_id: RoomId) {
        lock(&self.rooms).remove(&room_id);
    }

    pub(crate) fn replace_rooms(&self, rooms: HashSet<RoomId>) {
        *lock(&self.rooms) = rooms;
    }

    /// 标记为已注销，只有第一次调用返回 true
    pub(crate) fn mark_unregistered(&self) -> bool {
        !self.unregistered.swap(true, Ordering::AcqRel)
    }

    /// 标记为待驱逐，只有第一次调用返回 true
    pub(crate) fn mark_for_eviction(&self) -> bool {
        !self.eviction_scheduled.swap(true, Ordering::AcqRel)
    }

    /// 丢弃发送端并清空房间集合，然后触发关闭信号
    pub(crate) fn close_outbound(&self) {
        lock(&self.outbound).take();
        lock(&self.rooms).clear();
        self.closed.cancel();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 连接执行体，由传输层读任务独占
///
/// 被销毁时会向枢纽注销自己，保证连接任务退出后不会在注册表中残留。
pub struct ConnectionActor {
    handle: Arc<ConnectionHandle>,
    hub: Arc<ChatHub>,
    rate_gate: RateGate,
    clock: Arc<dyn Clock>,
}

impl ConnectionActor {
    pub(crate) fn new(
        handle: Arc<ConnectionHandle>,
        hub: Arc<ChatHub>,
        rate_gate: RateGate,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            handle,
            hub,
            rate_gate,
            clock,
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn user_id(&self) -> UserId {
        self.handle.user_id()
    }

    /// 处理一条上行帧
    ///
    /// 依次经过限流、解码、房间校验，最后交给枢纽广播给房间内除自己以外的用户。
    /// 任何一步失败都只记录日志并丢弃这条消息，连接保持打开。
    pub fn handle_inbound(&mut self, raw: &[u8]) -> Result<(), InboundError> {
        let result = self.process_inbound(raw);
        if result.is_err() {
            self.hub.record_rejected_inbound();
        }
        result
    }

    fn process_inbound(&mut self, raw: &[u8]) -> Result<(), InboundError> {
        let user_id = self.handle.user_id();

        if self.handle.is_closed() {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %self.handle.id(),
                "Inbound message dropped: connection unregistered"
            );
            return Err(InboundError::Disconnected);
        }

        if !self.rate_gate.allow(self.clock.now()) {
            tracing::warn!(
                user_id = %user_id,
                connection_id = %self.handle.id(),
                "Inbound message dropped: rate limit exceeded"
            );
            return Err(InboundError::RateLimited {
                current: self.rate_gate.message_count(),
                max: self.rate_gate.max_messages(),
            });
        }

        let event = ClientEvent::decode(raw).map_err(|err| {
            tracing::warn!(
                user_id = %user_id,
                connection_id = %self.handle.id(),
                error = %err,
                "Inbound message dropped: malformed frame"
            );
            InboundError::Malformed(err)
        })?;

        let room_id = event.chat_room_id;
        if !self.handle.is_in_room(room_id) {
            tracing::warn!(
                user_id = %user_id,
                room_id = %room_id,
                "Inbound message dropped: room not joined"
            );
            return Err(InboundError::NotInRoom(room_id));
        }

        let frame = OutboundFrame::json(&event.attribute_to(user_id)).map_err(InboundError::Malformed)?;
        tracing::debug!(
            user_id = %user_id,
            room_id = %room_id,
            kind = event.kind.as_str(),
            "转发输入状态"
        );
        self.hub.broadcast_to_room(room_id, frame, user_id);
        Ok(())
    }
}

impl Drop for ConnectionActor {
    fn drop(&mut self) {
        self.hub.unregister(&self.handle);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> OutboundFrame {
        OutboundFrame::text(text)
    }

    #[test]
    fn enqueue_fails_fast_when_full() {
        let (handle, mut queue) = ConnectionHandle::new(UserId::new(1), 2);

        assert!(handle.enqueue(frame("a")).is_ok());
        assert!(handle.enqueue(frame("b")).is_ok());
        assert_eq!(handle.enqueue(frame("c")), Err(EnqueueError::Full));

        assert_eq!(queue.try_recv().unwrap().as_str(), "a");
        assert!(handle.enqueue(frame("d")).is_ok());
    }

    #[test]
    fn enqueue_after_close_is_rejected() {
        let (handle, mut queue) = ConnectionHandle::new(UserId::new(1), 4);
        handle.enqueue(frame("last")).unwrap();
        handle.close_outbound();

        assert!(handle.is_closed());
        assert_eq!(handle.enqueue(frame("late")), Err(EnqueueError::Closed));

        // 关闭前已入队的帧仍然可以被写任务取走
        assert_eq!(queue.try_recv().unwrap().as_str(), "last");
        assert!(matches!(
            queue.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn close_clears_rooms_and_fires_signal() {
        let (handle, _queue) = ConnectionHandle::new(UserId::new(1), 4);
        let signal = handle.close_signal();
        handle.add_room(RoomId::new(3));

        handle.close_outbound();

        assert!(signal.is_cancelled());
        assert!(!handle.is_in_room(RoomId::new(3)));
        assert!(handle.rooms().is_empty());
    }

    #[test]
    fn enqueue_reports_closed_when_writer_is_gone() {
        let (handle, queue) = ConnectionHandle::new(UserId::new(1), 4);
        drop(queue);
        assert_eq!(handle.enqueue(frame("x")), Err(EnqueueError::Closed));
    }

    #[test]
    fn lifecycle_flags_fire_once() {
        let (handle, _queue) = ConnectionHandle::new(UserId::new(1), 1);
        assert!(handle.mark_unregistered());
        assert!(!handle.mark_unregistered());
        assert!(handle.mark_for_eviction());
        assert!(!handle.mark_for_eviction());
    }

    #[test]
    fn room_set_tracks_membership() {
        let (handle, _queue) = ConnectionHandle::new(UserId::new(1), 1);
        handle.add_room(RoomId::new(1));
        handle.add_room(RoomId::new(2));
        handle.remove_room(RoomId::new(1));

        assert!(!handle.is_in_room(RoomId::new(1)));
        assert!(handle.is_in_room(RoomId::new(2)));
        assert_eq!(handle.rooms().len(), 1);
    }
}
