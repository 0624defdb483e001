// ---------------------------------------------------------------------------
// WebSocket event streaming
// ---------------------------------------------------------------------------

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};
use vigil_types::{ClientEvent, ServerEvent, Topic};

use crate::auth::{TokenCheck, check_token};
use crate::error::ApiError;
use crate::state::AppState;

/// Maximum number of concurrent WebSocket connections.
const MAX_WS_CONNECTIONS: usize = 1000;

#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn events_ws(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    // Browsers can't set Authorization headers on the upgrade request, so the
    // token travels in the query string.
    let user_id = match params.token.as_deref() {
        Some(token) => match check_token(&state, token) {
            TokenCheck::User(user_id) => Some(user_id),
            TokenCheck::ApiKey => None,
            TokenCheck::Invalid => {
                return Err(ApiError::Unauthorized("invalid token".into()));
            }
        },
        None if state.api_key_hash.is_some() => {
            return Err(ApiError::Unauthorized(
                "valid token query parameter required for WebSocket".into(),
            ));
        }
        None => None,
    };

    if state.hub.connection_count() >= MAX_WS_CONNECTIONS {
        return Err(ApiError::TooManyConnections);
    }

    // Authenticate before complaining about a malformed upgrade.
    let ws = ws.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let limit = state.server.max_ws_message_bytes;
    Ok(ws
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_ws(socket, state, user_id)))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>, user_id: Option<String>) {
    let (connection_id, mut outbound) = state.hub.connect(user_id.clone());
    state.hub.send_to(
        &connection_id,
        ServerEvent::Connected {
            connection_id: connection_id.clone(),
            user_id,
        },
    );
    info!(connection_id, "client connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, &connection_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(connection_id, error = %e, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(&connection_id);
    info!(connection_id, "client disconnected");
}

async fn handle_client_message(state: &AppState, connection_id: &str, text: &str) {
    let request: ClientEvent = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            state.hub.send_to(
                connection_id,
                ServerEvent::Error {
                    message: format!("invalid message: {e}"),
                },
            );
            return;
        }
    };

    let (topic, subscribe) = request.topic();
    if !subscribe {
        state.hub.unsubscribe(connection_id, &topic);
        return;
    }

    // Scan topics carry a snapshot so late subscribers catch up.
    let snapshot = match &topic {
        Topic::Scan(scan_id) => match scan_snapshot(state, connection_id, scan_id).await {
            Ok(scan) => Some(Box::new(scan)),
            Err(message) => {
                state
                    .hub
                    .send_to(connection_id, ServerEvent::Error { message });
                return;
            }
        },
        _ => None,
    };

    state.hub.subscribe(connection_id, topic.clone());
    state.hub.send_to(
        connection_id,
        ServerEvent::SubscriptionConfirmed {
            topic,
            scan: snapshot,
        },
    );
}

async fn scan_snapshot(
    state: &AppState,
    connection_id: &str,
    scan_id: &str,
) -> Result<vigil_types::Scan, String> {
    let loaded = state.store.lock().await.load_scan(scan_id);
    let scan = match loaded {
        Ok(Some(scan)) => scan,
        Ok(None) => return Err(format!("scan not found: {scan_id}")),
        Err(e) => {
            tracing::warn!(scan_id, error = %e, "failed to load scan snapshot");
            return Err("failed to load scan".into());
        }
    };
    let user = state.hub.user_of(connection_id);
    if !scan.is_owned_by(user.as_deref()) {
        return Err(format!("not allowed to watch scan {scan_id}"));
    }
    Ok(scan)
}
