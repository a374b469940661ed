//! 实时聊天枢纽
//!
//! 枢纽是会话注册表（用户 -> 连接列表）和房间索引（房间 -> 用户集合）的唯一持有者。
//! 两张表由同一把读写锁保护：注册、注销、加入、离开、广播都持有写锁，
//! 在线状态查询只持有读锁。持有枢纽锁时可以再获取单个连接的锁，反之不行。
//!
//! 广播是尽力而为的实时投递：对每个连接只做非阻塞入队，队列满的连接会被
//! 异步注销，广播本身从不等待慢消费者，也不会因为某个接收方失败而整体失败。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use config::HubConfig;
use domain::{OutboundFrame, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::broadcaster::MessageBroadcaster;
use crate::clock::{Clock, SystemClock};
use crate::connection::{ConnectionActor, ConnectionHandle, OutboundQueue};
use crate::rate_limiter::RateGate;

/// 注册表：两张表必须一起修改
#[derive(Default)]
struct Registry {
    /// 用户到在线连接的映射，键存在当且仅当至少有一个在线连接
    sessions: HashMap<UserId, Vec<Arc<ConnectionHandle>>>,
    /// 房间到打开该房间的用户集合，键存在当且仅当集合非空
    rooms: HashMap<RoomId, HashSet<UserId>>,
}

impl Registry {
    fn remove_user_from_room(&mut self, room_id: RoomId, user_id: UserId) {
        if let Some(users) = self.rooms.get_mut(&room_id) {
            users.remove(&user_id);
            if users.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
    }
}

#[derive(Default)]
struct HubCounters {
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    evicted_connections: AtomicU64,
    rejected_inbound: AtomicU64,
}

/// 枢纽运行统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HubStats {
    /// 至少有一个连接的用户数
    pub online_users: usize,
    /// 在线连接总数
    pub connections: usize,
    /// 至少有一个用户打开的房间数
    pub open_rooms: usize,
    /// 成功入队的下行帧数
    pub frames_delivered: u64,
    /// 因队列满或已关闭而丢弃的下行帧数
    pub frames_dropped: u64,
    /// 因背压被强制断开的连接数
    pub evicted_connections: u64,
    /// 被丢弃的上行消息数
    pub rejected_inbound: u64,
}

pub struct ChatHub {
    registry: RwLock<Registry>,
    config: HubConfig,
    clock: Arc<dyn Clock>,
    counters: HubCounters,
    this: Weak<ChatHub>,
}

impl ChatHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: HubConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry: RwLock::new(Registry::default()),
            config,
            clock,
            counters: HubCounters::default(),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// 为新接入的连接创建执行体和下行队列，并完成注册
    pub fn connect(self: &Arc<Self>, user_id: UserId) -> (ConnectionActor, OutboundQueue) {
        let (handle, queue) = ConnectionHandle::new(user_id, self.config.outbound_queue_capacity);
        self.register(handle.clone());

        let rate_gate = RateGate::from_config(&self.config, self.clock.now());
        let actor = ConnectionActor::new(handle, self.clone(), rate_gate, self.clock.clone());
        (actor, queue)
    }

    /// 把连接追加到所属用户的会话中
    ///
    /// 同一用户的新设备会继承该用户当前打开的房间，保证各设备的房间集合一致。
    /// 对同一个连接重复注册属于调用方错误，这里不做防护。
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        let user_id = handle.user_id();
        let mut registry = self.write();

        let connections = registry.sessions.entry(user_id).or_default();
        if let Some(existing) = connections.first() {
            handle.replace_rooms(existing.rooms());
        }
        connections.push(handle.clone());
        let device_count = connections.len();

        tracing::info!(
            user_id = %user_id,
            connection_id = %handle.id(),
            connections = device_count,
            "Connection registered"
        );
    }

    /// 注销连接
    ///
    /// 用户的最后一个连接断开时，删除会话条目，并把用户从它所在的所有房间中移除。
    /// 最后一步关闭下行队列并清空连接的房间集合，之后该连接不能再向任何房间转发。
    /// 重复注销同一个连接不会产生任何效果。
    pub fn unregister(&self, handle: &ConnectionHandle) {
        if !handle.mark_unregistered() {
            return;
        }

        let user_id = handle.user_id();
        let mut registry = self.write();

        let last_connection = match registry.sessions.get_mut(&user_id) {
            Some(connections) => {
                connections.retain(|conn| conn.id() != handle.id());
                connections.is_empty()
            }
            None => false,
        };

        let mut left_rooms = Vec::new();
        if last_connection {
            registry.sessions.remove(&user_id);
            for room_id in handle.rooms() {
                registry.remove_user_from_room(room_id, user_id);
                left_rooms.push(room_id);
            }
        }

        handle.close_outbound();
        drop(registry);

        tracing::info!(
            user_id = %user_id,
            connection_id = %handle.id(),
            offline = last_connection,
            rooms_left = left_rooms.len(),
            "Connection unregistered"
        );
    }

    /// 用户打开房间
    ///
    /// 离线用户（没有任何在线连接）调用时不做任何事。
    pub fn join_room(&self, user_id: UserId, room_id: RoomId) {
        let mut registry = self.write();

        let Some(connections) = registry.sessions.get(&user_id) else {
            tracing::debug!(user_id = %user_id, room_id = %room_id, "Join ignored: user offline");
            return;
        };
        for conn in connections {
            conn.add_room(room_id);
        }

        registry.rooms.entry(room_id).or_default().insert(user_id);
        tracing::debug!(user_id = %user_id, room_id = %room_id, "用户打开房间");
    }

    /// 用户关闭房间
    pub fn leave_room(&self, user_id: UserId, room_id: RoomId) {
        let mut registry = self.write();

        if let Some(connections) = registry.sessions.get(&user_id) {
            for conn in connections {
                conn.remove_room(room_id);
            }
        }

        registry.remove_user_from_room(room_id, user_id);
        tracing::debug!(user_id = %user_id, room_id = %room_id, "用户关闭房间");
    }

    /// 向房间内除发送者以外的所有在线连接投递一帧
    ///
    /// 没有人打开的房间直接忽略，事件不会被缓存。
    pub fn broadcast_to_room(&self, room_id: RoomId, frame: OutboundFrame, sender_id: UserId) {
        let mut stalled = Vec::new();
        let mut delivered = 0u64;

        {
            let registry = self.write();
            let Some(users) = registry.rooms.get(&room_id) else {
                tracing::debug!(room_id = %room_id, "Broadcast skipped: room has no live members");
                return;
            };

            for user_id in users.iter().filter(|user_id| **user_id != sender_id) {
                let Some(connections) = registry.sessions.get(user_id) else {
                    continue;
                };
                for conn in connections {
                    match conn.enqueue(frame.clone()) {
                        Ok(()) => delivered += 1,
                        Err(err) => {
                            tracing::warn!(
                                user_id = %user_id,
                                connection_id = %conn.id(),
                                room_id = %room_id,
                                error = %err,
                                "Outbound frame dropped, scheduling disconnect"
                            );
                            stalled.push(conn.clone());
                        }
                    }
                }
            }
        }

        self.counters
            .frames_delivered
            .fetch_add(delivered, Ordering::Relaxed);
        self.counters
            .frames_dropped
            .fetch_add(stalled.len() as u64, Ordering::Relaxed);

        for handle in stalled {
            self.schedule_eviction(handle);
        }
    }

    /// 用户是否至少有一个在线连接
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.read().sessions.contains_key(&user_id)
    }

    /// 当前打开房间的用户
    pub fn online_users_in_room(&self, room_id: RoomId) -> HashSet<UserId> {
        self.read().rooms.get(&room_id).cloned().unwrap_or_default()
    }

    /// 用户当前的在线连接数
    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.read().sessions.get(&user_id).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> HubStats {
        let registry = self.read();
        HubStats {
            online_users: registry.sessions.len(),
            connections: registry.sessions.values().map(Vec::len).sum(),
            open_rooms: registry.rooms.len(),
            frames_delivered: self.counters.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            evicted_connections: self.counters.evicted_connections.load(Ordering::Relaxed),
            rejected_inbound: self.counters.rejected_inbound.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_rejected_inbound(&self) {
        self.counters.rejected_inbound.fetch_add(1, Ordering::Relaxed);
    }

    /// 异步注销一个跟不上的连接
    ///
    /// 在 tokio 运行时内会派生任务执行；没有运行时则在当前线程（已释放枢纽锁）直接注销。
    fn schedule_eviction(&self, handle: Arc<ConnectionHandle>) {
        if !handle.mark_for_eviction() {
            return;
        }
        self.counters
            .evicted_connections
            .fetch_add(1, Ordering::Relaxed);

        match (self.this.upgrade(), tokio::runtime::Handle::try_current()) {
            (Some(hub), Ok(runtime)) => {
                runtime.spawn(async move {
                    hub.unregister(&handle);
                });
            }
            _ => self.unregister(&handle),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageBroadcaster for ChatHub {
    async fn broadcast(&self, room_id: RoomId, frame: OutboundFrame, sender_id: UserId) {
        self.broadcast_to_room(room_id, frame, sender_id);
    }
}
