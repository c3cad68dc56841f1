//! Inbound frame dispatch.

use tracing::{debug, warn};

use crate::codec;
use crate::error::Result;
use crate::negotiator::SessionNegotiator;
use crate::protocol::{Identity, Payload};

/// Decodes relay frames and hands them to the negotiator by message type.
pub struct SignalingRouter {
    local: Identity,
}

impl SignalingRouter {
    pub fn new(local: Identity) -> Self {
        Self { local }
    }

    /// Route one frame. Failures are logged here; the result is returned for
    /// callers that want it.
    pub async fn dispatch(&self, negotiator: &mut SessionNegotiator, frame: &str) -> Result<()> {
        let message = match codec::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping frame from relay: {}", e);
                return Err(e);
            }
        };

        if let Some(target) = &message.target {
            if *target != self.local {
                warn!(
                    "Dropping {} addressed to {}, not {}",
                    message.message_type().as_str(),
                    target,
                    self.local
                );
                return Ok(());
            }
        }

        let kind = message.message_type();
        let from = message.sender;
        let result = match message.payload {
            Payload::CallResponse(response) => negotiator.on_call_response(response).await,
            Payload::Offer(sdp) => negotiator.on_offer_received(from.clone(), sdp).await,
            Payload::Answer(sdp) => negotiator.apply_answer(from.clone(), sdp).await,
            Payload::IceCandidate(candidate) => {
                negotiator.add_remote_candidate(from.clone(), candidate).await
            }
            Payload::StoreUser | Payload::StartCall => {
                debug!("Ignoring {} from {}", kind.as_str(), from);
                Ok(())
            }
        };

        if let Err(e) = &result {
            warn!("{} from {} not applied: {}", kind.as_str(), from, e);
        }
        result
    }
}
