//! Websocket link to the relay.

use std::sync::Mutex;
use std::time::Duration;

use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Result, SignalError};
use crate::protocol::{Identity, SignalMessage};

/// Something outbound signaling messages can be written to.
pub trait SignalSink: Send + Sync {
    fn send(&self, message: &SignalMessage) -> Result<()>;

    /// Stop accepting messages. Idempotent.
    fn close(&self);
}

/// What the link reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(String),
    Closed,
}

/// An open connection to the relay.
///
/// Writes go through an unbounded channel to a writer task that also pings the
/// relay; a reader task forwards text frames as [`LinkEvent::Frame`].
pub struct TransportLink {
    identity: Identity,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl TransportLink {
    /// Connect to `url` and register `identity` with the relay.
    pub async fn open(
        url: &str,
        identity: Identity,
        ping_interval: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>)> {
        info!("Dialing relay {} as {}", url, identity);
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| SignalError::Connect(e.to_string()))?;
        let (mut sender, mut receiver) = socket.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let start = time::Instant::now() + ping_interval;
            let mut ping_interval = time::interval_at(start, ping_interval);
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            if sender.send(msg).await.is_err() { break; }
                        }
                        None => break,
                    },
                    _ = ping_interval.tick() => {
                        if sender.send(Message::Ping(Vec::new())).await.is_err() { break; }
                    }
                }
            }
            if let Err(e) = sender.close().await {
                debug!("Relay socket close: {}", e);
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        debug!("<-- {}", text);
                        if event_tx.send(LinkEvent::Frame(text)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        debug!("Ignoring {} byte binary frame from relay", data.len());
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Relay socket error: {}", e);
                        break;
                    }
                }
            }
            info!("Relay link closed");
            let _ = event_tx.send(LinkEvent::Closed);
        });

        let link = Self {
            identity: identity.clone(),
            outbound: Mutex::new(Some(tx)),
        };
        link.send(&SignalMessage::store_user(identity))?;
        Ok((link, event_rx))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_open(&self) -> bool {
        self.outbound
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

impl SignalSink for TransportLink {
    fn send(&self, message: &SignalMessage) -> Result<()> {
        let guard = self.outbound.lock().map_err(|_| SignalError::LinkClosed)?;
        let tx = guard.as_ref().ok_or(SignalError::LinkClosed)?;
        let text = codec::encode(message);
        debug!("--> {}", text);
        tx.send(Message::Text(text))
            .map_err(|_| SignalError::LinkClosed)
    }

    /// Release the connection. Later sends fail with [`SignalError::LinkClosed`].
    fn close(&self) {
        if let Ok(mut guard) = self.outbound.lock() {
            if guard.take().is_some() {
                info!("Closing relay link for {}", self.identity);
            }
        }
    }
}
