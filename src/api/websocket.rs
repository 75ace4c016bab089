//! WebSocket handler for the live telemetry stream
//!
//! Each connection registers exactly once with the hub and unregisters when
//! either side goes away. If the hub drops the viewer for falling behind, the
//! socket is closed after the buffered events were sent.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let (viewer_id, mut events) = state.hub.connect().await;
    info!("viewer {viewer_id} connected");

    let (mut sender, mut receiver) = socket.split();

    // Forward hub events to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode hub event: {e}");
                    continue;
                }
            };

            if sender.send(Message::Text(text)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                return;
            }
        }

        debug!("hub closed the stream of viewer {viewer_id}");
        let _ = sender.send(Message::Close(None)).await;
    });

    // Viewers do not send anything meaningful, just wait for the close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.hub.unregister(viewer_id).await;
    info!("viewer {viewer_id} disconnected");
}
