use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `call_response` data the relay sends when the target has no open socket.
pub const PEER_OFFLINE: &str = "user is not online";
/// `call_response` data the reference relay sends when the target is online.
pub const PEER_READY: &str = "user is ready for call";

/// Name a client registers under at the relay.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Two-character identity cut from a random UUID.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(id[..2].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Identity {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Wire value of the envelope's `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    StoreUser,
    StartCall,
    CallResponse,
    #[serde(alias = "create_offer")]
    OfferReceived,
    #[serde(alias = "create_answer")]
    AnswerReceived,
    IceCandidate,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::StoreUser => "store_user",
            MessageType::StartCall => "start_call",
            MessageType::CallResponse => "call_response",
            MessageType::OfferReceived => "offer_received",
            MessageType::AnswerReceived => "answer_received",
            MessageType::IceCandidate => "ice_candidate",
        }
    }

    /// Every type except registration must name a target.
    pub fn requires_target(self) -> bool {
        !matches!(self, MessageType::StoreUser)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description produced and consumed by the media engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub kind: SdpKind,
    pub body: String,
}

impl SessionDescriptor {
    pub fn offer(body: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            body: body.into(),
        }
    }

    pub fn answer(body: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            body: body.into(),
        }
    }
}

/// ICE candidate as carried in `ice_candidate` data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateDescriptor {
    /// Required; a candidate with a null `sdpMid` does not decode.
    #[serde(rename = "sdpMid")]
    pub mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub m_line_index: u16,
    #[serde(rename = "sdpCandidate")]
    pub candidate: String,
}

impl IceCandidateDescriptor {
    pub fn new(mid: impl Into<String>, m_line_index: u16, candidate: impl Into<String>) -> Self {
        Self {
            mid: mid.into(),
            m_line_index,
            candidate: candidate.into(),
        }
    }
}

/// Relay verdict on a `start_call`.
#[derive(Clone, Debug, PartialEq)]
pub enum CallResponse {
    Unreachable,
    Accepted(Value),
}

/// Typed payload, one case per message type.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    StoreUser,
    StartCall,
    CallResponse(CallResponse),
    Offer(String),
    Answer(String),
    IceCandidate(IceCandidateDescriptor),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::StoreUser => MessageType::StoreUser,
            Payload::StartCall => MessageType::StartCall,
            Payload::CallResponse(_) => MessageType::CallResponse,
            Payload::Offer(_) => MessageType::OfferReceived,
            Payload::Answer(_) => MessageType::AnswerReceived,
            Payload::IceCandidate(_) => MessageType::IceCandidate,
        }
    }
}

/// A decoded signaling message.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalMessage {
    pub sender: Identity,
    pub target: Option<Identity>,
    pub payload: Payload,
}

impl SignalMessage {
    pub fn store_user(sender: Identity) -> Self {
        Self {
            sender,
            target: None,
            payload: Payload::StoreUser,
        }
    }

    pub fn to_peer(sender: Identity, target: Identity, payload: Payload) -> Self {
        Self {
            sender,
            target: Some(target),
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}
