//! WebSocket relay for room document updates and presence.
//!
//! One persistent connection per client, addressed by room id in the path.
//! On join the client sends its version vector and receives the operations
//! it is missing (delta sync); afterwards updates are relayed to every other
//! connection in the room. The server applies every update to its own
//! replica, so late joiners sync against an authoritative copy. An abrupt
//! drop is recoverable: the client reconnects and repeats the join exchange,
//! and idempotent application makes redelivery harmless.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crdt::VersionVector;
use crate::room::document::RoomOp;
use crate::room::registry::Room;
use crate::room::PresenceState;
use crate::state::AppState;

/// Frames sent by clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join-protocol opener: "here is what I have seen".
    SyncRequest { version: VersionVector },
    /// One document mutation.
    Update { op: RoomOp },
    /// Announce or refresh this connection's presence.
    Presence { state: PresenceState },
}

/// Frames sent by the server.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The operations the client was missing plus the server's own vector,
    /// so the client can push back anything the server lacks.
    SyncResponse {
        ops: Vec<RoomOp>,
        version: VersionVector,
    },
    Update { op: RoomOp },
    /// Full presence map for the room; sent on every presence change.
    Presence {
        peers: HashMap<Uuid, PresenceState>,
    },
}

fn encode(frame: &ServerFrame) -> String {
    serde_json::to_string(frame).expect("relay frame serializes")
}

/// `GET /ws/{room_id}` upgrade endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, room_id, state))
}

async fn handle_connection(socket: WebSocket, room_id: String, state: AppState) {
    let conn_id = Uuid::new_v4();
    let room = state.rooms.attach(&room_id).await;
    info!(%room_id, %conn_id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let mut frames = room.frames.subscribe();

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if handle_frame(&room, conn_id, &text, &mut sink).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            outbound = frames.recv() => {
                match outbound {
                    Ok((origin, json)) => {
                        if origin != conn_id && sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    // A lagged receiver has lost relay frames; the client
                    // recovers them on its next sync request.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%conn_id, skipped, "relay receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Presence is transport-scoped: clear it the moment the connection ends.
    let had_presence = room.presence.write().await.remove(&conn_id).is_some();
    if had_presence {
        broadcast_presence(&room).await;
    }
    state.rooms.detach(&room);
    info!(%room_id, %conn_id, "client disconnected");
}

async fn handle_frame(
    room: &Arc<Room>,
    conn_id: Uuid,
    text: &str,
    sink: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            // A malformed frame is the client's problem, not the room's.
            warn!(%conn_id, %err, "ignoring malformed relay frame");
            return Ok(());
        }
    };

    match frame {
        ClientFrame::SyncRequest { version } => {
            let doc = room.doc.read().await;
            let ops = doc.ops_since(&version);
            let reply = ServerFrame::SyncResponse {
                ops,
                version: doc.version().clone(),
            };
            drop(doc);
            sink.send(Message::Text(encode(&reply))).await?;
        }
        ClientFrame::Update { op } => {
            let applied = room.doc.write().await.apply(op.clone());
            // Re-applied duplicates are not rebroadcast.
            if applied {
                let json = encode(&ServerFrame::Update { op });
                let _ = room.frames.send((conn_id, json));
            }
        }
        ClientFrame::Presence { state } => {
            room.presence.write().await.insert(conn_id, state);
            broadcast_presence(room).await;
        }
    }
    Ok(())
}

/// Send the full presence map to every connection, sender included.
async fn broadcast_presence(room: &Arc<Room>) {
    let peers = room.presence.read().await.clone();
    let json = encode(&ServerFrame::Presence { peers });
    let _ = room.frames.send((Uuid::nil(), json));
}
