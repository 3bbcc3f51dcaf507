//! WebSocket alert stream.
//!
//! Each upgraded connection registers one hub subscriber and receives every
//! alert as a JSON text frame. Inbound messages are ignored apart from close.
//! The subscriber is unregistered when either side goes away; when the hub
//! evicts the subscriber the socket is closed.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use super::controller::AppState;
use crate::infrastructure::hub::AlertHub;

/// Keepalive ping period.
const PING_INTERVAL: Duration = Duration::from_secs(30);

pub(super) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state.hub))
}

async fn serve_subscriber(socket: WebSocket, hub: AlertHub) {
    let mut subscriber = hub.register();
    let id = subscriber.id();
    tracing::info!(subscriber_id = %id, "Subscriber connected");

    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            outbound = subscriber.recv() => {
                let Some(json) = outbound else {
                    tracing::info!(subscriber_id = %id, "Subscriber dropped by hub");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if sink.send(Message::Text(json.as_ref().into())).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.unregister(id);
    tracing::info!(subscriber_id = %id, "Subscriber disconnected");
}
