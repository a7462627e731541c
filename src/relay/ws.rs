use std::collections::HashMap;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use tokio::time;
use tracing::{debug, warn};

use super::Relay;
use crate::auth::Admission;
use crate::protocol::{ClientMessage, RelayMessage};

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub admission: Admission,
    pub ping_interval: Duration,
}

#[derive(Serialize)]
struct Health {
    clients: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/socket", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        clients: state.relay.len(),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    match state.admission.check(params.get("token").map(String::as_str)) {
        Ok(subject) => {
            if let Some(subject) = subject {
                debug!(%subject, "admitted relay connection");
            }
            ws.on_upgrade(move |socket| handle_socket(socket, state))
        }
        Err(err) => {
            warn!("rejected relay connection: {err}");
            (StatusCode::UNAUTHORIZED, err.to_string()).into_response()
        }
    }
}

fn encode(msg: &RelayMessage) -> Option<Message> {
    serde_json::to_string(msg)
        .ok()
        .map(|text| Message::Text(text.into()))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut outbox) = state.relay.connect();
    let ping_every = state.ping_interval;

    // Drains the relay outbox into the socket, pinging while idle
    let send_task = tokio::spawn(async move {
        let mut ping_interval = time::interval(ping_every);
        loop {
            tokio::select! {
                msg = outbox.recv() => {
                    let Some(msg) = msg else { break };
                    let Some(frame) = encode(&msg) else { continue };
                    if sender.send(frame).await.is_err() { break; }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() { break; }
                }
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => state.relay.dispatch(&id, msg),
                Err(err) => {
                    debug!(client = %id, "malformed frame: {err}");
                    state.relay.send_to(
                        &id,
                        RelayMessage::Error {
                            message: "MALFORMED_JSON".into(),
                        },
                    );
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.relay.disconnect(&id);
    send_task.abort();
}
