//! Call signaling client for relay-brokered peer-to-peer calls.
//!
//! A [`CallClient`] registers with a relay over a websocket, exchanges offers,
//! answers and ICE candidates with one peer at a time, and drives a
//! [`MediaEngine`] supplied by the embedding application. The [`relay`]
//! module holds a small reference relay speaking the same protocol.

pub mod call_state;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod media;
pub mod negotiator;
pub mod protocol;
pub mod relay;
pub mod router;
pub mod transport;

pub use call_state::CallState;
pub use client::CallClient;
pub use config::{ClientConfig, RelayConfig};
pub use error::{Result, SignalError};
pub use media::{EngineEvents, MediaEngine, MediaEngineFactory};
pub use negotiator::CallNotice;
pub use protocol::{IceCandidateDescriptor, Identity, SessionDescriptor, SignalMessage};
