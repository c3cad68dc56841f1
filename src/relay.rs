//! Minimal in-memory relay speaking the client wire protocol.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::error::Result;
use crate::protocol::{CallResponse, Identity, PEER_READY, Payload, SignalMessage};

// Registered identity -> (owning socket, outbound queue)
type PeerMap = Arc<DashMap<Identity, (Uuid, mpsc::UnboundedSender<Message>)>>;

#[derive(Clone)]
pub struct RelayState {
    peers: PeerMap,
    ping_interval: Duration,
}

impl RelayState {
    pub fn new(ping_interval: Duration) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            ping_interval,
        }
    }

    pub fn is_online(&self, identity: &Identity) -> bool {
        self.peers.contains_key(identity)
    }

    pub fn online_count(&self) -> usize {
        self.peers.len()
    }

    fn deliver(&self, target: &Identity, message: &SignalMessage) -> bool {
        match self.peers.get(target) {
            Some(peer) => peer.1.send(text(message)).is_ok(),
            None => false,
        }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// Serve the relay on an already bound listener until it fails.
pub async fn serve(listener: TcpListener, state: RelayState) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

fn text(message: &SignalMessage) -> Message {
    Message::Text(codec::encode(message).into())
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn_id = Uuid::new_v4();
    let mut registered: Option<Identity> = None;

    let ping_every = state.ping_interval;
    let send_task = tokio::spawn(async move {
        let mut ping_interval = time::interval(ping_every);
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    if sender.send(msg).await.is_err() { break; }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![].into())).await.is_err() { break; }
                }
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(frame) = msg else {
            continue;
        };
        let message = match codec::decode(frame.as_str()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Relay dropping frame from {}: {}", conn_id, e);
                continue;
            }
        };

        match message.payload {
            Payload::StoreUser => {
                info!("{} registered", message.sender);
                state
                    .peers
                    .insert(message.sender.clone(), (conn_id, tx.clone()));
                registered = Some(message.sender);
            }

            Payload::StartCall => {
                let Some(target) = message.target else {
                    continue;
                };
                let response = if state.is_online(&target) {
                    CallResponse::Accepted(PEER_READY.into())
                } else {
                    CallResponse::Unreachable
                };
                debug!("{} asks for {}: {:?}", message.sender, target, response);
                let reply = SignalMessage::to_peer(
                    target,
                    message.sender,
                    Payload::CallResponse(response),
                );
                let _ = tx.send(text(&reply));
            }

            Payload::Offer(_) | Payload::Answer(_) | Payload::IceCandidate(_) => {
                let Some(target) = message.target.clone() else {
                    continue;
                };
                let routed = SignalMessage {
                    sender: registered.clone().unwrap_or(message.sender),
                    target: Some(target.clone()),
                    payload: message.payload,
                };
                if !state.deliver(&target, &routed) {
                    debug!(
                        "Dropping {} for offline {}",
                        routed.message_type().as_str(),
                        target
                    );
                }
            }

            Payload::CallResponse(_) => {
                debug!("Ignoring call_response sent by {}", message.sender);
            }
        }
    }

    if let Some(identity) = registered {
        state.peers.remove_if(&identity, |_, (owner, _)| *owner == conn_id);
        info!("{} disconnected from relay", identity);
    }
    send_task.abort();
}
