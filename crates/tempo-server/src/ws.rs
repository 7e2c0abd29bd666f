use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use tempo_auth::AuthError;
use tempo_core::ids::UserId;
use tempo_core::protocol::decode_client_message;

use crate::server::AppState;

/// Close code sent when the `token` query parameter is missing, invalid,
/// or expired.
pub const CLOSE_AUTH_REJECTED: u16 = 4401;
/// Close code sent when the server hits a transport fault mid-connection.
pub const CLOSE_ABNORMAL: u16 = 1011;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Entry point for `GET /ws`. The token is checked before the upgrade
/// completes; a bad token still gets a proper websocket handshake so the
/// client receives close code 4401 instead of a raw HTTP error.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = match query.token.as_deref() {
        Some(token) => state.keys.verify(token),
        None => Err(AuthError::Missing),
    };

    match verified {
        Ok(claims) => {
            let user_id = claims.user_id();
            ws.on_upgrade(move |socket| run_connection(socket, state, user_id))
        }
        Err(error) => {
            tracing::warn!(error = %error, "websocket auth rejected");
            ws.on_upgrade(|mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_AUTH_REJECTED,
                        reason: "authentication rejected".into(),
                    })))
                    .await;
            })
        }
    }
}

/// Drive one authenticated connection until it disconnects. Outbound
/// traffic goes through the registry channel so broadcasts from other
/// connections and this connection's own close frames share a single
/// writer.
async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut rx) = state.registry.register(&user_id);
    let connection_id = handle.id.clone();
    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        connections = state.registry.connection_count(&user_id),
        "websocket connected"
    );

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_tx.send(message).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(next) = ws_rx.next().await {
        match next {
            Ok(Message::Text(text)) => match decode_client_message(text.as_str()) {
                Ok(message) => state.engine.apply(message),
                Err(error) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %error,
                        "dropping malformed message"
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            // Ping/pong is handled by the transport.
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(user_id = %user_id, error = %error, "websocket receive fault");
                let _ = handle.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_ABNORMAL,
                    reason: "internal error".into(),
                })));
                break;
            }
        }
    }

    state.registry.unregister(&user_id, &connection_id);
    // Dropping the handle closes the channel once no broadcast holds a
    // clone, letting the writer drain queued frames and exit.
    drop(handle);
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "websocket disconnected");
}
