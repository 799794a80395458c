//! `/events` websocket: pushes progress snapshots to observers.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::broadcast::ProgressEvent;
use crate::state::AppState;

pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observe(socket, state))
}

async fn observe(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    // subscribe before the first snapshot so nothing falls in between
    let mut events = state.broadcaster.subscribe();
    tracing::info!("👀 Observer connected");

    let greeting = [
        ProgressEvent::Log("Connected.".to_string()),
        state.broadcaster.snapshot(),
    ];
    for event in &greeting {
        if send_event(&mut sender, event).await.is_err() {
            tracing::debug!("Observer left during handshake");
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                // the next snapshot supersedes whatever was missed
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Observer lagged, skipped {} snapshot(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    tracing::info!("📨 Observer says: {}", text);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Observer socket error: {}", e);
                    break;
                }
            },
        }
    }

    tracing::info!("👋 Observer disconnected");
}

async fn send_event<S>(sender: &mut S, event: &ProgressEvent) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to encode progress event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(payload)).await
}
