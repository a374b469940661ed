use std::time::Duration;

use application::{ConnectionActor, OutboundQueue};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserId;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::state::AppState;

/// WebSocket 连接管理器
///
/// 封装单个 WebSocket 连接的两个任务：
/// - 发送任务：排空枢纽下行队列、回应 pong、定期发送 ping
/// - 接收任务：把客户端帧交给连接执行体处理
///
/// 任意一个任务结束都会让整个连接结束。执行体被销毁时自动向枢纽注销；
/// 枢纽主动注销（背压驱逐）时两个任务都会被立即中止，socket 随之关闭。
pub struct WebSocketConnection {
    socket: WebSocket,
    actor: ConnectionActor,
    outbound: OutboundQueue,
    heartbeat: Option<Duration>,
}

impl WebSocketConnection {
    /// 建立连接并注册到枢纽
    pub fn new(socket: WebSocket, state: &AppState, user_id: UserId) -> Self {
        let (actor, outbound) = state.hub.connect(user_id);
        tracing::info!(
            user_id = %user_id,
            connection_id = %actor.id(),
            "WebSocket 连接已建立"
        );

        Self {
            socket,
            actor,
            outbound,
            heartbeat: state.hub.config().heartbeat_interval(),
        }
    }

    /// 运行 WebSocket 连接的主循环
    pub async fn run(self) {
        let Self {
            socket,
            mut actor,
            outbound,
            heartbeat,
        } = self;
        let user_id = actor.user_id();
        let connection_id = actor.id();
        let closed = actor.handle().close_signal();

        let (sender, mut incoming) = socket.split();

        // 接收任务只需要回 pong，容量很小即可
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(8);

        let mut send_task = tokio::spawn(Self::send_loop(sender, outbound, cmd_rx, heartbeat));

        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if Self::handle_incoming(message, &mut actor, &cmd_tx).await.is_err() {
                    break;
                }
            }
            tracing::debug!("WebSocket接收任务结束");
            // actor 在这里被销毁，随之注销
        });

        // 等待任意一个任务完成，或者枢纽注销了这个连接
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!("WebSocket发送任务完成");
                recv_task.abort();
            }
            _ = &mut recv_task => {
                tracing::debug!("WebSocket接收任务完成");
                send_task.abort();
            }
            _ = closed.cancelled() => {
                // 对端可能已经不再读取，写任务会一直卡在 send 上，不再排空积压
                tracing::info!(user_id = %user_id, "连接已被枢纽注销，强制断开");
                send_task.abort();
                recv_task.abort();
            }
        }

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            "WebSocket连接已断开"
        );
    }

    async fn send_loop(
        mut sender: SplitSink<WebSocket, WsMessage>,
        mut outbound: OutboundQueue,
        mut cmd_rx: mpsc::Receiver<WsCommand>,
        heartbeat: Option<Duration>,
    ) {
        let mut heartbeat = heartbeat.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        // 枢纽已关闭下行队列（注销或背压驱逐）
                        tracing::info!("Outbound queue closed, closing socket");
                        let _ = sender.send(WsMessage::Close(None)).await;
                        break;
                    };
                    if sender.send(WsMessage::Text(frame.as_str().to_owned().into())).await.is_err() {
                        tracing::warn!("Failed to send text message");
                        break;
                    }
                }
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        WsCommand::SendPong(data) => {
                            if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                                tracing::warn!("Failed to send pong message");
                                break;
                            }
                        }
                    }
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        tracing::warn!("Failed to send ping message");
                        break;
                    }
                }
            }
        }
    }

    /// 处理来自客户端的消息
    ///
    /// 返回错误表示连接应当结束。被丢弃的业务帧不会结束连接。
    async fn handle_incoming(
        message: WsMessage,
        actor: &mut ConnectionActor,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::info!(user_id = %actor.user_id(), "WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                if cmd_tx
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .is_err()
                {
                    tracing::warn!("Failed to send pong command");
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {
                tracing::trace!("收到pong消息");
            }
            WsMessage::Text(text) => {
                // 丢弃原因已经在执行体内记录
                let _ = actor.handle_inbound(text.as_str().as_bytes());
            }
            WsMessage::Binary(data) => {
                let _ = actor.handle_inbound(&data);
            }
        }
        Ok(())
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}
