//! Boundary to the native media engine.
//!
//! The core never touches capture, codecs or ICE itself. It drives a
//! [`MediaEngine`] built per call session by a [`MediaEngineFactory`], and the
//! engine reports back through [`EngineEvents`], which feeds the call task's
//! queue. Every event carries the [`SessionId`] it was created for so events
//! from a torn down session can be told apart from live ones.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{IceCandidateDescriptor, SessionDescriptor};

/// Tag of one call session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Peer connection state as reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the call cannot continue.
    pub fn ends_call(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Opaque reference to a remote media stream, handed to the UI for rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaStreamHandle(pub String);

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    LocalCandidate(IceCandidateDescriptor),
    ConnectionStateChanged(ConnectionState),
    RemoteStreamAdded(MediaStreamHandle),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaggedEngineEvent {
    pub session: SessionId,
    pub event: EngineEvent,
}

/// Callback sink given to an engine when it is created.
#[derive(Clone, Debug)]
pub struct EngineEvents {
    session: SessionId,
    tx: mpsc::UnboundedSender<TaggedEngineEvent>,
}

impl EngineEvents {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<TaggedEngineEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn local_candidate(&self, candidate: IceCandidateDescriptor) {
        self.post(EngineEvent::LocalCandidate(candidate));
    }

    pub fn connection_state_changed(&self, state: ConnectionState) {
        self.post(EngineEvent::ConnectionStateChanged(state));
    }

    pub fn remote_stream_added(&self, handle: MediaStreamHandle) {
        self.post(EngineEvent::RemoteStreamAdded(handle));
    }

    fn post(&self, event: EngineEvent) {
        let tagged = TaggedEngineEvent {
            session: self.session,
            event,
        };
        if self.tx.send(tagged).is_err() {
            debug!("Call task gone, dropping engine event for {}", self.session);
        }
    }
}

/// Operations the core needs from a peer connection.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescriptor>;

    async fn create_answer(&self) -> Result<SessionDescriptor>;

    async fn set_local_description(&self, description: SessionDescriptor) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescriptor) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidateDescriptor) -> Result<()>;

    /// Release the peer connection. Called once per engine.
    async fn close(&self);
}

/// Builds one [`MediaEngine`] per call session.
#[async_trait]
pub trait MediaEngineFactory: Send + Sync {
    async fn create(&self, events: EngineEvents) -> Result<Box<dyn MediaEngine>>;
}
