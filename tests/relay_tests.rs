use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async, MaybeTlsStream, WebSocketStream};

use coderoom::allowlist::Allowlist;
use coderoom::config::Config;
use coderoom::http;
use coderoom::jobs::store::SqliteJobStore;
use coderoom::state::AppState;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_gateway() -> (u16, AppState) {
    let state = AppState::new(
        Config::default(),
        Allowlist::empty(),
        Arc::new(SqliteJobStore::in_memory().unwrap()),
    );
    let app = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (port, state)
}

async fn connect(port: u16, room: &str) -> WsClient {
    // Nagle would hold back-to-back small frames for a delayed ACK (~40ms),
    // letting a later connection's sync request overtake them.
    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    tcp.set_nodelay(true).unwrap();
    let (ws, _) = client_async(format!("ws://127.0.0.1:{port}/ws/{room}"), MaybeTlsStream::Plain(tcp))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut WsClient, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn recv(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn set_file_op(name: &str, content: &str, counter: u64, replica: u64) -> Value {
    json!({
        "kind": "set_file",
        "name": name,
        "content": content,
        "stamp": { "counter": counter, "replica": replica }
    })
}

#[tokio::test]
async fn join_protocol_delta_syncs_late_joiners() {
    let (port, _) = spawn_gateway().await;

    let mut alice = connect(port, "room-sync").await;
    send(&mut alice, json!({ "type": "sync_request", "version": {} })).await;
    let reply = recv(&mut alice).await;
    assert_eq!(reply["type"], "sync_response");
    assert_eq!(reply["ops"].as_array().unwrap().len(), 0);

    send(
        &mut alice,
        json!({ "type": "update", "op": set_file_op("main.py", "print(1)", 1, 42) }),
    )
    .await;
    send(
        &mut alice,
        json!({ "type": "update", "op": set_file_op("util.py", "x = 1", 2, 42) }),
    )
    .await;

    // A late joiner with an empty vector receives the full history.
    let mut bob = connect(port, "room-sync").await;
    send(&mut bob, json!({ "type": "sync_request", "version": {} })).await;
    let reply = recv(&mut bob).await;
    assert_eq!(reply["type"], "sync_response");
    assert_eq!(reply["ops"].as_array().unwrap().len(), 2);
    assert_eq!(reply["version"]["42"], 2);

    // A reconnecting replica that already saw everything gets a delta of
    // nothing.
    drop(alice);
    let mut alice = connect(port, "room-sync").await;
    send(
        &mut alice,
        json!({ "type": "sync_request", "version": { "42": 2 } }),
    )
    .await;
    let reply = recv(&mut alice).await;
    assert_eq!(reply["ops"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn updates_are_relayed_to_peers_but_not_echoed() {
    let (port, _) = spawn_gateway().await;

    let mut alice = connect(port, "room-relay").await;
    let mut bob = connect(port, "room-relay").await;
    // A sync roundtrip proves the receiver's relay loop is live before any
    // peer broadcasts.
    send(&mut alice, json!({ "type": "sync_request", "version": {} })).await;
    recv(&mut alice).await;

    send(
        &mut bob,
        json!({ "type": "update", "op": set_file_op("main.py", "print(2)", 1, 7) }),
    )
    .await;

    let frame = recv(&mut alice).await;
    assert_eq!(frame["type"], "update");
    assert_eq!(frame["op"]["name"], "main.py");

    // Bob gets no echo: his next frame is the reply to a sync request, not
    // his own update.
    send(&mut bob, json!({ "type": "sync_request", "version": {} })).await;
    let frame = recv(&mut bob).await;
    assert_eq!(frame["type"], "sync_response");
}

#[tokio::test]
async fn duplicate_updates_are_not_rebroadcast() {
    let (port, _) = spawn_gateway().await;

    let mut alice = connect(port, "room-dup").await;
    let mut bob = connect(port, "room-dup").await;
    send(&mut bob, json!({ "type": "sync_request", "version": {} })).await;
    recv(&mut bob).await;

    let update = json!({ "type": "update", "op": set_file_op("main.py", "v", 1, 9) });
    send(&mut alice, update.clone()).await;
    send(&mut alice, update).await;

    let first = recv(&mut bob).await;
    assert_eq!(first["type"], "update");

    // The duplicate was a no-op on the server replica, so nothing else is
    // in flight ahead of this sync reply.
    send(&mut bob, json!({ "type": "sync_request", "version": {} })).await;
    let next = recv(&mut bob).await;
    assert_eq!(next["type"], "sync_response");
    assert_eq!(next["ops"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn presence_is_broadcast_and_cleared_on_disconnect() {
    let (port, _) = spawn_gateway().await;

    let mut alice = connect(port, "room-presence").await;
    let mut bob = connect(port, "room-presence").await;
    for ws in [&mut alice, &mut bob] {
        send(ws, json!({ "type": "sync_request", "version": {} })).await;
        recv(ws).await;
    }

    send(
        &mut alice,
        json!({ "type": "presence", "state": { "displayName": "Otter", "color": "#60a5fa" } }),
    )
    .await;
    let frame = recv(&mut bob).await;
    assert_eq!(frame["type"], "presence");
    assert_eq!(frame["peers"].as_object().unwrap().len(), 1);

    send(
        &mut bob,
        json!({ "type": "presence", "state": { "displayName": "Heron", "color": "#f87171" } }),
    )
    .await;
    let frame = recv(&mut alice).await;
    assert_eq!(frame["type"], "presence");
    let frame = recv(&mut alice).await;
    assert_eq!(frame["peers"].as_object().unwrap().len(), 2);

    // Bob's identity vanishes with his connection.
    bob.close(None).await.unwrap();
    let frame = recv(&mut alice).await;
    assert_eq!(frame["type"], "presence");
    let names: Vec<_> = frame["peers"]
        .as_object()
        .unwrap()
        .values()
        .map(|p| p["displayName"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Otter"]);
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (port, state) = spawn_gateway().await;

    let mut alice = connect(port, "room-a").await;
    let mut carol = connect(port, "room-b").await;
    // Make sure both connections are attached before broadcasting.
    send(&mut carol, json!({ "type": "sync_request", "version": {} })).await;
    recv(&mut carol).await;

    send(
        &mut alice,
        json!({ "type": "update", "op": set_file_op("main.py", "v", 1, 3) }),
    )
    .await;

    // Nothing crosses room boundaries.
    let crossed = timeout(Duration::from_millis(300), carol.next()).await;
    assert!(crossed.is_err(), "update leaked into another room");

    assert_eq!(state.rooms.len().await, 2);
    assert!(state.rooms.get("room-a").await.is_some());
}
