// =============================================================================
// WebSocket Handler — Event push feed
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive every event
// published to the event bus as it happens — cycle boundaries, agent
// decisions, position opens/closes, account updates — rather than a
// polled full-state snapshot. Each connection owns one bus subscription
// with its own bounded outbox; a slow client drops events rather than
// stalling delivery to everyone else.
//
// The handler also:
//   - Responds to Ping frames with Pong frames.
//   - Treats inbound text frames as a heartbeat (logged, otherwise ignored).
//   - Cleans up its subscription on disconnect by dropping the receiver.
// =============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::api::rest::ApiState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Axum handler for the WebSocket upgrade request.
///
/// Validates the token from the `?token=` query parameter before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (
            axum::http::StatusCode::FORBIDDEN,
            "Invalid or missing token",
        )
            .into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

/// Manages a single WebSocket connection lifecycle.
///
/// Runs two concurrent loops via `tokio::select!`: the bus subscription
/// forwarding events to the client, and the receive loop handling
/// Ping/Pong/Close/heartbeat frames from it.
async fn handle_ws_connection(socket: WebSocket, state: ApiState) {
    let (mut rx, dropped) = state.services.events.subscribe();
    let (mut sender, mut receiver) = socket.split();
    use futures_util::{SinkExt, StreamExt};

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(envelope) => {
                        match serde_json::to_string(&envelope) {
                            Ok(json) => {
                                if let Err(e) = sender.send(Message::Text(json.into())).await {
                                    debug!(error = %e, "WebSocket send failed — disconnecting");
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to serialize event envelope");
                            }
                        }
                    }
                    None => {
                        info!("event bus shut down — closing WebSocket");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket text message received (heartbeat)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("WebSocket Pong received");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("WebSocket binary message ignored");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended (None)");
                        break;
                    }
                }
            }
        }
    }

    let dropped_count = dropped.load(std::sync::atomic::Ordering::Relaxed);
    if dropped_count > 0 {
        debug!(dropped = dropped_count, "WebSocket subscriber dropped events while connected");
    }
    info!("WebSocket connection closed");
}
