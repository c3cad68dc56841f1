//! Wire envelope `{ type, sender, target, data }` to and from [`SignalMessage`].

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Result, SignalError};
use crate::protocol::{
    CallResponse, IceCandidateDescriptor, Identity, MessageType, PEER_OFFLINE, Payload,
    SignalMessage,
};

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageType,
    sender: Identity,
    #[serde(default)]
    target: Option<Identity>,
    #[serde(default)]
    data: Value,
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<SignalMessage> {
    let envelope: Envelope = serde_json::from_str(text)?;

    if envelope.kind.requires_target() && envelope.target.is_none() {
        return Err(SignalError::Decode(format!(
            "{} without target",
            envelope.kind.as_str()
        )));
    }

    let payload = match envelope.kind {
        MessageType::StoreUser => Payload::StoreUser,
        MessageType::StartCall => Payload::StartCall,
        MessageType::CallResponse => match envelope.data {
            Value::String(ref s) if s == PEER_OFFLINE => {
                Payload::CallResponse(CallResponse::Unreachable)
            }
            other => Payload::CallResponse(CallResponse::Accepted(other)),
        },
        MessageType::OfferReceived => Payload::Offer(sdp_body(envelope.kind, envelope.data)?),
        MessageType::AnswerReceived => Payload::Answer(sdp_body(envelope.kind, envelope.data)?),
        MessageType::IceCandidate => {
            let candidate: IceCandidateDescriptor = serde_json::from_value(envelope.data)
                .map_err(|e| SignalError::Decode(format!("ice_candidate data: {}", e)))?;
            Payload::IceCandidate(candidate)
        }
    };

    Ok(SignalMessage {
        sender: envelope.sender,
        target: envelope.target,
        payload,
    })
}

fn sdp_body(kind: MessageType, data: Value) -> Result<String> {
    match data {
        Value::String(body) => Ok(body),
        other => Err(SignalError::Decode(format!(
            "{} data must be a session description string, got {}",
            kind.as_str(),
            other
        ))),
    }
}

/// Encode a message as a text frame.
pub fn encode(message: &SignalMessage) -> String {
    let data = match &message.payload {
        Payload::StoreUser | Payload::StartCall => Value::Null,
        Payload::CallResponse(CallResponse::Unreachable) => Value::from(PEER_OFFLINE),
        Payload::CallResponse(CallResponse::Accepted(value)) => value.clone(),
        Payload::Offer(body) | Payload::Answer(body) => Value::from(body.as_str()),
        Payload::IceCandidate(c) => json!({
            "sdpMid": c.mid,
            "sdpMLineIndex": c.m_line_index,
            "sdpCandidate": c.candidate,
        }),
    };

    json!({
        "type": message.message_type().as_str(),
        "sender": message.sender.as_str(),
        "target": message.target.as_ref().map(Identity::as_str),
        "data": data,
    })
    .to_string()
}
