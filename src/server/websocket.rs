//! WebSocket handler streaming world snapshots to subscribed clients.
//!
//! Delivery is fire-and-forget per client: the broadcast channel is
//! bounded, a lagged client skips the frames it missed, and a disconnect
//! never reaches the tick loop.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;

use crate::coordinator::CoordinatorState;
use crate::store::WorldView;

use super::state::AppState;

/// Messages pushed to WebSocket clients
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    /// Coordinator state at subscription time
    State { state: CoordinatorState },
    /// A published world snapshot
    Snapshot(WorldView),
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut snapshot_rx = state.subscribe_snapshots();

    let send_state = Arc::clone(&state);
    let send_task = tokio::spawn(async move {
        let current = send_state.coordinator_state().await;
        if let Ok(json) = serde_json::to_string(&ServerMessage::State { state: current }) {
            let _ = sender.send(Message::Text(json.into())).await;
        }

        // Late subscribers start from the latest frame.
        if let Some(snapshot) = send_state.latest_snapshot().await {
            let message = ServerMessage::Snapshot((*snapshot).clone());
            if let Ok(json) = serde_json::to_string(&message) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    return;
                }
            }
        }

        loop {
            match snapshot_rx.recv().await {
                Ok(snapshot) => {
                    let message = ServerMessage::Snapshot((*snapshot).clone());
                    match serde_json::to_string(&message) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::error!("failed to serialize snapshot: {}", e);
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("websocket client lagged, skipped {} snapshots", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    });

    // The inbound side only watches for the close frame; commands go over
    // the REST surface.
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    log::debug!("websocket client disconnected");
}
