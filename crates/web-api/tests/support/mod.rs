#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::ChatHub;
use config::HubConfig;
use domain::UserId;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<ChatHub>,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(HubConfig {
            heartbeat_interval_secs: 0,
            ..HubConfig::default()
        })
        .await
    }

    pub async fn start_with(config: HubConfig) -> Self {
        let hub = ChatHub::new(config);
        let app = router(AppState::new(hub.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            hub,
            _shutdown: shutdown_tx,
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 建立 WebSocket 连接，并等待枢纽完成注册
    pub async fn connect(&self, user_id: u64) -> WsClient {
        let before = self.hub.connection_count(UserId::new(user_id));
        let url = format!("ws://{}/ws?user_id={}", self.addr, user_id);
        let (ws, _) = connect_async(url).await.expect("websocket connect");

        self.wait_until(|hub| hub.connection_count(UserId::new(user_id)) > before)
            .await;
        ws
    }

    pub async fn wait_until(&self, condition: impl Fn(&ChatHub) -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition(&self.hub) {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

/// 读取下一条文本帧并解析为 JSON，跳过控制帧
pub async fn next_json(ws: &mut WsClient) -> Value {
    timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(TungsteniteMessage::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("json frame");
                }
                Some(Ok(TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_))) => continue,
                other => panic!("unexpected websocket item: {:?}", other),
            }
        }
    })
    .await
    .expect("no frame received in time")
}

/// 断言在给定时间内没有收到任何文本帧
pub async fn expect_silence(ws: &mut WsClient, wait: Duration) {
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) = timeout(wait, ws.next()).await {
        panic!("unexpected frame: {}", text.as_str());
    }
}
