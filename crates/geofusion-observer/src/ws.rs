//! `WebSocket` handler for the observer push channel.
//!
//! Clients connect to `GET /ws`. The first frame is always
//! `initial_state`; after that every commit arrives as `event_batch`
//! frames followed by a `risk_update`, in commit order.
//!
//! Each client drains its own bounded queue in the store's distributor.
//! When the distributor drops a client for falling behind, its queue closes
//! and this handler closes the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use geofusion_core::distribution::Subscription;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and start pushing
/// store updates.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Handle the `WebSocket` lifecycle: register with the distributor and
/// forward each queued message as a text frame.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let Subscription { id, mut rx } = state.store.connect_observer(state.queue_capacity).await;
    debug!(observer_id = id, "WebSocket client connected");

    loop {
        tokio::select! {
            // Next message from this client's queue.
            queued = rx.recv() => {
                let Some(message) = queued else {
                    info!(observer_id = id, "Observer queue closed, disconnecting slow client");
                    break;
                };
                let json = match serde_json::to_string(&*message) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!(observer_id = id, "Failed to serialize outbound message: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!(observer_id = id, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            // Check if the client sent a close frame or disconnected.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(observer_id = id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(observer_id = id, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(observer_id = id, "WebSocket error: {e}");
                        break;
                    }
                    Some(Ok(other)) => {
                        debug!(observer_id = id, ?other, "Ignoring client message");
                    }
                }
            }
        }
    }

    state.store.distributor().unregister(id).await;
}
