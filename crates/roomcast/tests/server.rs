//! Integration tests for the roomcast server, handler, and full connection flow.
//!
//! Every test runs a real server on a loopback port and talks to it with
//! `tokio-tungstenite` clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use roomcast::prelude::*;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =========================================================================
// Helpers
// =========================================================================

/// Starts a server on an ephemeral port and returns its address and rooms.
async fn start_server(tick: Duration) -> (SocketAddr, Arc<Rooms>) {
    let server = RoomcastServer::builder()
        .bind("127.0.0.1:0")
        .room_config(RoomConfig::with_tick_interval(tick))
        .build()
        .await
        .expect("server should bind");
    let addr = server.local_addr().expect("server should have an address");
    let rooms = Arc::clone(server.rooms());
    tokio::spawn(server.run());
    (addr, rooms)
}

/// A tick long enough that no counter_update shows up during a test.
const QUIET: Duration = Duration::from_secs(60);

async fn connect(addr: SocketAddr, target: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{target}"))
        .await
        .expect("client should connect");
    ws
}

/// Next text frame, parsed as JSON.
async fn next_json(ws: &mut ClientWs) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("frame should be JSON");
        }
    }
}

/// Next event with the given name, skipping any others.
async fn next_event(ws: &mut ClientWs, name: &str) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame["event"] == name {
            return frame["data"].clone();
        }
    }
}

async fn wait_for_room_count(rooms: &Rooms, expected: usize) {
    for _ in 0..150 {
        if rooms.room_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room count never reached {expected}");
}

/// Plain HTTP/1.1 GET without an upgrade. Returns the status, the
/// lowercased head, and the body.
async fn http_get(addr: SocketAddr, target: &str) -> (u16, String, String) {
    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    let request = format!("GET {target} HTTP/1.1\r\nHost: {addr}\r\nAccept: */*\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(3), stream.read_to_string(&mut response))
        .await
        .expect("timed out waiting for the response")
        .expect("response should be readable");

    let (head, body) = response.split_once("\r\n\r\n").expect("head and body");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status line");
    (status, head.to_ascii_lowercase(), body.to_string())
}

async fn expect_rejected(addr: SocketAddr, target: &str, status: u16) {
    let Err(err) = tokio_tungstenite::connect_async(format!("ws://{addr}{target}")).await else {
        panic!("upgrade of {target} should have been refused");
    };
    match err {
        WsError::Http(resp) => assert_eq!(resp.status().as_u16(), status, "{target}"),
        other => panic!("expected an HTTP error for {target}, got {other:?}"),
    }
}

// =========================================================================
// Join
// =========================================================================

#[tokio::test]
async fn test_join_receives_own_user_join() {
    let (addr, rooms) = start_server(QUIET).await;
    let mut ann = connect(addr, "/ws?room_id=lobby&user_id=ann").await;

    let data = next_event(&mut ann, "user_join").await;
    assert_eq!(data["user_id"], "ann");
    assert_eq!(data["room_id"], "lobby");
    assert_eq!(data["total_users"], 1);
    assert!(data["joined_at"].as_str().is_some_and(|t| t.ends_with('Z')));

    assert_eq!(rooms.room_count().await, 1);
}

#[tokio::test]
async fn test_second_join_is_broadcast_to_both() {
    let (addr, _rooms) = start_server(QUIET).await;
    let mut ann = connect(addr, "/ws?room_id=lobby&user_id=ann").await;
    next_event(&mut ann, "user_join").await;

    let mut bob = connect(addr, "/ws?room_id=lobby&user_id=bob").await;

    let seen_by_ann = next_event(&mut ann, "user_join").await;
    let seen_by_bob = next_event(&mut bob, "user_join").await;
    for data in [seen_by_ann, seen_by_bob] {
        assert_eq!(data["user_id"], "bob");
        assert_eq!(data["total_users"], 2);
    }
}

#[tokio::test]
async fn test_query_values_are_decoded() {
    let (addr, _rooms) = start_server(QUIET).await;
    let mut ws = connect(addr, "/ws?room_id=my%20room&user_id=a+b").await;

    let data = next_event(&mut ws, "user_join").await;
    assert_eq!(data["room_id"], "my room");
    assert_eq!(data["user_id"], "a b");
}

#[tokio::test]
async fn test_missing_user_id_joins_with_empty_user() {
    let (addr, _rooms) = start_server(QUIET).await;
    let mut ws = connect(addr, "/ws?room_id=lobby").await;

    let data = next_event(&mut ws, "user_join").await;
    assert_eq!(data["user_id"], "");
}

// =========================================================================
// Counter
// =========================================================================

#[tokio::test]
async fn test_counter_updates_arrive_in_order() {
    let (addr, _rooms) = start_server(Duration::from_millis(100)).await;
    let mut ws = connect(addr, "/ws?room_id=ticking&user_id=ann").await;

    let first = next_event(&mut ws, "counter_update").await;
    let second = next_event(&mut ws, "counter_update").await;
    assert_eq!(first["count"], 1);
    assert_eq!(first["room_id"], "ticking");
    assert_eq!(second["count"], 2);
}

#[tokio::test]
async fn test_inbound_messages_are_ignored() {
    let (addr, rooms) = start_server(Duration::from_millis(100)).await;
    let mut ws = connect(addr, "/ws?room_id=chatty&user_id=ann").await;
    next_event(&mut ws, "user_join").await;

    ws.send(Message::text("hello")).await.expect("send should succeed");
    ws.send(Message::binary(vec![1, 2, 3])).await.expect("send should succeed");

    let update = next_event(&mut ws, "counter_update").await;
    assert_eq!(update["room_id"], "chatty");
    let room = rooms.room(&RoomId::new("chatty")).await.expect("room should exist");
    assert_eq!(room.member_count().await, 1);
}

// =========================================================================
// Leave
// =========================================================================

#[tokio::test]
async fn test_leave_is_broadcast_and_last_leave_removes_room() {
    let (addr, rooms) = start_server(QUIET).await;
    let mut ann = connect(addr, "/ws?room_id=lobby&user_id=ann").await;
    next_event(&mut ann, "user_join").await;
    let mut bob = connect(addr, "/ws?room_id=lobby&user_id=bob").await;
    next_event(&mut ann, "user_join").await;
    next_event(&mut bob, "user_join").await;

    bob.close(None).await.expect("close should succeed");

    let data = next_event(&mut ann, "user_leave").await;
    assert_eq!(data["user_id"], "bob");
    assert_eq!(data["total_users"], 1);
    assert!(data["left_at"].is_string());
    assert_eq!(rooms.room_count().await, 1);

    ann.close(None).await.expect("close should succeed");
    wait_for_room_count(&rooms, 0).await;
}

#[tokio::test]
async fn test_dropped_client_is_cleaned_up() {
    let (addr, rooms) = start_server(QUIET).await;
    let mut ws = connect(addr, "/ws?room_id=lobby&user_id=ann").await;
    next_event(&mut ws, "user_join").await;

    drop(ws);
    wait_for_room_count(&rooms, 0).await;
}

// =========================================================================
// Monitoring endpoint
// =========================================================================

#[tokio::test]
async fn test_monitor_reports_live_rooms() {
    let (addr, _rooms) = start_server(QUIET).await;
    let mut ann = connect(addr, "/ws?room_id=alpha&user_id=ann").await;
    next_event(&mut ann, "user_join").await;
    let mut bob = connect(addr, "/ws?room_id=alpha&user_id=bob").await;
    next_event(&mut bob, "user_join").await;
    let mut cat = connect(addr, "/ws?room_id=beta&user_id=cat").await;
    next_event(&mut cat, "user_join").await;

    let mut monitor = connect(addr, "/ws/rooms").await;
    let report = next_json(&mut monitor).await;

    assert_eq!(
        report,
        serde_json::json!({
            "rooms": {
                "alpha": { "connections": 2, "counter": 0, "started": true },
                "beta": { "connections": 1, "counter": 0, "started": true },
            }
        })
    );

    // The server closes the monitor connection after the report.
    let rest = tokio::time::timeout(Duration::from_secs(3), monitor.next())
        .await
        .expect("server should close the monitor connection");
    assert!(matches!(rest, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn test_monitor_with_no_rooms() {
    let (addr, _rooms) = start_server(QUIET).await;
    let mut monitor = connect(addr, "/ws/rooms").await;
    assert_eq!(next_json(&mut monitor).await, serde_json::json!({ "rooms": {} }));
}

#[tokio::test]
async fn test_plain_get_on_monitor_path_returns_json() {
    let (addr, _rooms) = start_server(QUIET).await;
    let mut ann = connect(addr, "/ws?room_id=alpha&user_id=ann").await;
    next_event(&mut ann, "user_join").await;

    let (status, head, body) = http_get(addr, "/ws/rooms").await;
    assert_eq!(status, 200);
    assert!(head.contains("content-type: application/json"), "{head}");

    let report: Value = serde_json::from_str(&body).expect("body should be JSON");
    assert_eq!(
        report,
        serde_json::json!({
            "rooms": { "alpha": { "connections": 1, "counter": 0, "started": true } }
        })
    );
}

#[tokio::test]
async fn test_plain_get_on_monitor_path_with_no_rooms() {
    let (addr, _rooms) = start_server(QUIET).await;
    let (status, _, body) = http_get(addr, "/ws/rooms").await;
    assert_eq!(status, 200);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        serde_json::json!({ "rooms": {} })
    );
}

#[tokio::test]
async fn test_plain_get_on_other_paths_is_not_served() {
    let (addr, rooms) = start_server(QUIET).await;

    let (status, _, _) = http_get(addr, "/ws?room_id=lobby&user_id=ann").await;
    assert_eq!(status, 426);
    let (status, _, body) = http_get(addr, "/ws").await;
    assert_eq!(status, 400);
    assert!(body.contains("room_id"));
    let (status, _, _) = http_get(addr, "/nope").await;
    assert_eq!(status, 404);

    assert_eq!(rooms.room_count().await, 0);
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_missing_room_id_is_rejected() {
    let (addr, rooms) = start_server(QUIET).await;
    expect_rejected(addr, "/ws", 400).await;
    expect_rejected(addr, "/ws?room_id=", 400).await;
    expect_rejected(addr, "/ws?user_id=ann", 400).await;
    assert_eq!(rooms.room_count().await, 0);
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (addr, _rooms) = start_server(QUIET).await;
    expect_rejected(addr, "/", 404).await;
    expect_rejected(addr, "/rooms", 404).await;
}

#[tokio::test]
async fn test_server_keeps_accepting_after_rejection() {
    let (addr, _rooms) = start_server(QUIET).await;
    expect_rejected(addr, "/nope", 404).await;

    let mut ws = connect(addr, "/ws?room_id=lobby&user_id=ann").await;
    let data = next_event(&mut ws, "user_join").await;
    assert_eq!(data["total_users"], 1);
}

#[tokio::test]
async fn test_silent_peer_does_not_block_joins() {
    let (addr, _rooms) = start_server(QUIET).await;

    // Opens a socket and never sends a request.
    let _silent = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = tokio::time::timeout(
        Duration::from_secs(2),
        connect(addr, "/ws?room_id=lobby&user_id=ann"),
    )
    .await
    .expect("join must not wait on the silent peer");
    let data = next_event(&mut ws, "user_join").await;
    assert_eq!(data["total_users"], 1);
}
