mod support;

use std::time::Duration;

use config::HubConfig;
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use support::{expect_silence, next_json, TestServer};

async fn join(client: &Client, server: &TestServer, room: u64, user: u64) -> serde_json::Value {
    client
        .post(server.http(&format!("/api/v1/rooms/{}/join", room)))
        .json(&json!({ "user_id": user }))
        .send()
        .await
        .expect("join room")
        .json()
        .await
        .expect("join json")
}

fn typing(kind: &str, room: u64) -> TungsteniteMessage {
    TungsteniteMessage::text(json!({"type": kind, "chat_room_id": room}).to_string())
}

#[tokio::test]
async fn typing_event_is_relayed_to_other_room_members() {
    let server = TestServer::start().await;
    let client = Client::new();

    let mut u1 = server.connect(1).await;
    let mut u2 = server.connect(2).await;
    join(&client, &server, 42, 1).await;
    let presence = join(&client, &server, 42, 2).await;
    assert_eq!(presence, json!({"room_id": 42, "online_users": [1, 2]}));

    u1.send(typing("typing_start", 42)).await.expect("send typing");

    assert_eq!(
        next_json(&mut u2).await,
        json!({"type": "typing_start", "chat_room_id": 42, "user_id": 1})
    );
    expect_silence(&mut u1, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn persisted_message_fans_out_to_every_device() {
    let server = TestServer::start().await;
    let client = Client::new();

    let mut author = server.connect(10).await;
    let mut phone = server.connect(20).await;
    let mut laptop = server.connect(20).await;
    join(&client, &server, 7, 10).await;
    join(&client, &server, 7, 20).await;

    let message = json!({"id": 900, "chat_room_id": 7, "sender_id": 10, "content": "hi"});
    let response = client
        .post(server.http("/api/v1/rooms/7/broadcast"))
        .json(&json!({"sender_id": 10, "payload": message}))
        .send()
        .await
        .expect("broadcast");
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    assert_eq!(next_json(&mut phone).await, message);
    assert_eq!(next_json(&mut laptop).await, message);
    expect_silence(&mut author, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn broadcast_without_payload_is_rejected() {
    let server = TestServer::start().await;
    let response = Client::new()
        .post(server.http("/api/v1/rooms/7/broadcast"))
        .json(&json!({"sender_id": 10, "payload": null}))
        .send()
        .await
        .expect("broadcast");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.expect("error json");
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn typing_flood_is_shed_after_ten_per_second() {
    let server = TestServer::start().await;
    let client = Client::new();

    let mut typist = server.connect(1).await;
    let mut watcher = server.connect(2).await;
    join(&client, &server, 3, 1).await;
    join(&client, &server, 3, 2).await;

    for _ in 0..11 {
        typist.send(typing("typing_start", 3)).await.expect("send typing");
    }

    for _ in 0..10 {
        next_json(&mut watcher).await;
    }
    expect_silence(&mut watcher, Duration::from_millis(300)).await;

    server.wait_until(|hub| hub.stats().rejected_inbound == 1).await;
}

#[tokio::test]
async fn unjoined_room_and_garbage_frames_keep_socket_open() {
    let server = TestServer::start().await;
    let client = Client::new();

    let mut typist = server.connect(1).await;
    let mut watcher = server.connect(2).await;
    join(&client, &server, 1, 1).await;
    join(&client, &server, 2, 2).await;

    typist.send(typing("typing_start", 2)).await.expect("send");
    typist
        .send(TungsteniteMessage::text("definitely not json"))
        .await
        .expect("send");
    expect_silence(&mut watcher, Duration::from_millis(200)).await;

    // 连接仍然可用
    join(&client, &server, 2, 1).await;
    typist.send(typing("typing_stop", 2)).await.expect("send");
    assert_eq!(
        next_json(&mut watcher).await,
        json!({"type": "typing_stop", "chat_room_id": 2, "user_id": 1})
    );
}

#[tokio::test]
async fn missing_user_id_is_rejected_before_upgrade() {
    let server = TestServer::start().await;
    let url = format!("ws://{}/ws", server.addr);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
    assert_eq!(server.hub.stats().connections, 0);
}

#[tokio::test]
async fn stalled_reader_is_disconnected_after_eviction() {
    let server = TestServer::start_with(HubConfig {
        outbound_queue_capacity: 2,
        heartbeat_interval_secs: 0,
        ..HubConfig::default()
    })
    .await;
    let client = Client::new();
    let stalled_user = UserId::new(1);

    let mut stalled = server.connect(1).await;
    let mut watcher = server.connect(2).await;
    join(&client, &server, 9, 1).await;
    join(&client, &server, 9, 2).await;

    // 客户端从不读取，服务端写任务最终卡在 socket 上，下行队列随之溢出
    let bulky = json!({ "blob": "x".repeat(256 * 1024) });
    for _ in 0..400 {
        if !server.hub.is_online(stalled_user) {
            break;
        }
        client
            .post(server.http("/api/v1/rooms/9/broadcast"))
            .json(&json!({ "sender_id": 2, "payload": bulky }))
            .send()
            .await
            .expect("broadcast");
    }
    server.wait_until(|hub| !hub.is_online(stalled_user)).await;
    assert_eq!(server.hub.stats().evicted_connections, 1);

    // 被驱逐的 socket 不能再转发任何事件
    let _ = stalled.send(typing("typing_start", 9)).await;
    expect_silence(&mut watcher, Duration::from_millis(300)).await;

    // 服务端已经丢弃 socket，客户端读完内核缓冲后流就会结束
    timeout(Duration::from_secs(5), async {
        loop {
            match stalled.next().await {
                Some(Ok(TungsteniteMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("evicted socket should be closed by the server");
}

#[tokio::test]
async fn heartbeat_pings_client_and_answers_client_pings() {
    let server = TestServer::start_with(HubConfig {
        heartbeat_interval_secs: 1,
        ..HubConfig::default()
    })
    .await;
    let mut ws = server.connect(1).await;

    timeout(Duration::from_secs(3), async {
        loop {
            match ws.next().await {
                Some(Ok(TungsteniteMessage::Ping(_))) => break,
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket item: {:?}", other),
            }
        }
    })
    .await
    .expect("server ping within heartbeat interval");

    ws.send(TungsteniteMessage::Ping(b"hub?".to_vec().into()))
        .await
        .expect("send ping");
    let pong = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(TungsteniteMessage::Pong(data))) => return data,
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket item: {:?}", other),
            }
        }
    })
    .await
    .expect("pong received");
    assert_eq!(&pong[..], b"hub?");
}
