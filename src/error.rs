use thiserror::Error;

use crate::call_state::CallState;
use crate::protocol::Identity;

/// Errors raised by the signaling core. None of them are fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("Relay link is closed")]
    LinkClosed,

    #[error("Malformed signaling frame: {0}")]
    Decode(String),

    #[error("Peer {0} is not reachable")]
    PeerUnreachable(Identity),

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: CallState,
        action: &'static str,
    },

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Failed to connect to relay: {0}")]
    Connect(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        SignalError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for SignalError {
    fn from(err: std::io::Error) -> Self {
        SignalError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SignalError>;
