//! WebSocket transport: upgrades `GET /`, pairs each connection with an
//! outbound channel, and routes dispatcher output either back to the
//! requester or to every connected client.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{Dispatcher, Outbound};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 38301;

/// Registry of connected clients. Broadcasting prunes clients whose
/// outbound channel has closed, so one dead connection never wedges the
/// rest.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    clients: Arc<DashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, sender: mpsc::UnboundedSender<String>) {
        self.clients.insert(id, sender);
        info!(client = %id, connected = self.clients.len(), "client connected");
    }

    pub fn unregister(&self, id: &Uuid) {
        self.clients.remove(id);
        info!(client = %id, connected = self.clients.len(), "client disconnected");
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Sends to every connected client, dropping the ones that are gone.
    pub fn broadcast(&self, message: &Value) {
        let frame = message.to_string();
        self.clients.retain(|id, sender| {
            let alive = sender.send(frame.clone()).is_ok();
            if !alive {
                debug!(client = %id, "pruning closed connection");
            }
            alive
        });
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub broadcaster: Broadcaster,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// Binds and serves until the listener fails or the process is stopped.
pub async fn serve(host: &str, port: u16, state: AppState) -> Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("listening on ws://{}:{}", host, port);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.broadcaster.register(id, tx.clone());

    // Outbound: drain the connection's channel into the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Inbound: dispatch each text frame and route the replies.
    let dispatcher = state.dispatcher.clone();
    let broadcaster = state.broadcaster.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    for outbound in dispatcher.handle(&text) {
                        match outbound {
                            Outbound::Requester(value) => {
                                if tx.send(value.to_string()).is_err() {
                                    return;
                                }
                            }
                            Outbound::All(value) => broadcaster.broadcast(&value),
                        }
                    }
                }
                Message::Close(_) => break,
                // Binary frames are not part of the protocol.
                Message::Binary(_) => warn!(client = %id, "ignoring binary frame"),
                _ => {}
            }
        }
    });

    // Whichever side finishes first tears down the other.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
    state.broadcaster.unregister(&id);
}
