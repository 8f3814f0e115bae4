//! Push endpoints: WebSocket and Server-Sent Events.
//!
//! Each connection owns one broadcaster `Subscription`. The connection
//! task ends on client close, read/send error, send timeout, eviction by
//! the broadcaster, or process shutdown; dropping the subscription
//! unregisters it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use futures::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;

use super::AppState;

// =============================================================================
// WebSocket
// =============================================================================

pub(super) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = state.broadcaster.register();
    let id = subscription.id();
    let cancel = state.shutdown.child_token();
    let send_timeout = state.push.send_timeout;

    let mut keepalive = tokio::time::interval(state.push.keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await;

    tracing::debug!(subscription_id = %id, "WebSocket client connected");

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break "shutdown",
            frame = subscription.recv() => {
                let Some(frame) = frame else { break "evicted" };
                let message = Message::Text(frame.payload.to_string().into());
                if let Err(reason) = send_bounded(&mut socket, message, send_timeout).await {
                    break reason;
                }
            }
            _ = keepalive.tick() => {
                if let Err(reason) = send_bounded(&mut socket, Message::Ping(Bytes::new()), send_timeout).await {
                    break reason;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break "client closed",
                Some(Err(_)) => break "read error",
                Some(Ok(_)) => {}
            },
        }
    };

    drop(subscription);
    if reason == "shutdown" || reason == "evicted" {
        let _ = tokio::time::timeout(send_timeout, socket.send(Message::Close(None))).await;
    }
    tracing::debug!(subscription_id = %id, reason, "WebSocket client disconnected");
}

async fn send_bounded(
    socket: &mut WebSocket,
    message: Message,
    timeout: Duration,
) -> Result<(), &'static str> {
    match tokio::time::timeout(timeout, socket.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err("send error"),
        Err(_) => Err("send timeout"),
    }
}

// =============================================================================
// Server-Sent Events
// =============================================================================

pub(super) async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.register();
    tracing::debug!(subscription_id = %subscription.id(), "SSE client connected");

    let events = subscription
        .map(|frame| {
            Ok(Event::default()
                .id(frame.round_id.to_string())
                .data(&*frame.payload))
        })
        .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(events).keep_alive(KeepAlive::new().interval(state.push.keepalive_interval))
}
