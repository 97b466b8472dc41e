//! Worker-channel WebSocket endpoint.
//!
//! A service or agent connects here with `?apiKey=...&serviceId=...` and
//! holds the socket open for the lifetime of its process. One registered
//! session per service, authenticated against the project registry.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use orra_channel::{InboundMessage, OutboundEnvelope};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "serviceId")]
    pub service_id: String,
}

/// Upgrade a worker-channel connection after authenticating the connect
/// query: unauthorized or cross-project connects are rejected before the
/// upgrade completes.
pub async fn channel_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    let project = match state.projects.authenticate(&query.api_key) {
        Ok(p) => p,
        Err(_) => return (axum::http::StatusCode::UNAUTHORIZED, "invalid api key").into_response(),
    };

    match state.services.get(&project.id, &query.service_id) {
        Ok(_) => {}
        Err(_) => {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "service does not belong to this project",
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, project.id, query.service_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, project_id: String, service_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundEnvelope>();

    let session_id = state.channel.connect(&project_id, &service_id, outbound_tx);
    tracing::info!(service_id = %service_id, session_id, "worker channel connected");

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode outbound envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
        };

        if let Err(e) = state.channel.check_message_size(&service_id, text.len()) {
            tracing::warn!(service_id = %service_id, error = %e, "dropping oversized worker message");
            continue;
        }

        match serde_json::from_str::<InboundMessage>(&text) {
            Ok(message) => state.channel.handle_message(&service_id, message),
            Err(e) => {
                tracing::warn!(service_id = %service_id, error = %e, "dropping malformed worker message");
            }
        }
    }

    writer.abort();
    state.channel.disconnect(&service_id, session_id);
    tracing::info!(service_id = %service_id, session_id, "worker channel disconnected");
}
