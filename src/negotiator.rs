//! Offer/answer/candidate sequencing for the single live call.
//!
//! [`SessionNegotiator`] owns the [`CallSession`], its media engine and the
//! queue of remote candidates that arrived before a remote description was
//! set. It must only be driven from one task (see [`crate::client`]); engine
//! calls are awaited inline so no two operations interleave.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::call_state::{CallState, CallStateMachine, Transition};
use crate::error::{Result, SignalError};
use crate::media::{
    ConnectionState, EngineEvent, EngineEvents, MediaEngine, MediaEngineFactory,
    MediaStreamHandle, SessionId, TaggedEngineEvent,
};
use crate::protocol::{
    CallResponse, IceCandidateDescriptor, Identity, Payload, SessionDescriptor, SignalMessage,
};
use crate::transport::SignalSink;

/// Conditions surfaced to the UI layer.
#[derive(Clone, Debug, PartialEq)]
pub enum CallNotice {
    PeerUnreachable(Identity),
    NegotiationFailed(String),
    RemoteStream(MediaStreamHandle),
    CallEnded,
    LinkClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// The call currently being negotiated.
pub struct CallSession {
    id: SessionId,
    peer: Identity,
    role: Role,
    engine: Option<Box<dyn MediaEngine>>,
    remote_offer: Option<SessionDescriptor>,
    offer_sent: bool,
    pending_candidates: VecDeque<IceCandidateDescriptor>,
    has_remote_description: bool,
}

impl CallSession {
    fn new(peer: Identity, role: Role) -> Self {
        Self {
            id: SessionId::new(),
            peer,
            role,
            engine: None,
            remote_offer: None,
            offer_sent: false,
            pending_candidates: VecDeque::new(),
            has_remote_description: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &Identity {
        &self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pending_candidates(&self) -> impl Iterator<Item = &IceCandidateDescriptor> {
        self.pending_candidates.iter()
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    /// Apply every buffered candidate in arrival order.
    async fn drain_candidates(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_ref() else {
            return Ok(());
        };
        if !self.pending_candidates.is_empty() {
            debug!(
                "Applying {} buffered candidates for {}",
                self.pending_candidates.len(),
                self.peer
            );
        }
        while let Some(candidate) = self.pending_candidates.pop_front() {
            engine.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }
}

/// Observable values published for the UI.
#[derive(Clone)]
pub struct CallObservers {
    pub state: watch::Sender<CallState>,
    pub incoming: watch::Sender<Option<Identity>>,
    pub notices: broadcast::Sender<CallNotice>,
}

impl Default for CallObservers {
    fn default() -> Self {
        Self::new()
    }
}

impl CallObservers {
    pub fn new() -> Self {
        let (state, _) = watch::channel(CallState::Idle);
        let (incoming, _) = watch::channel(None);
        let (notices, _) = broadcast::channel(32);
        Self {
            state,
            incoming,
            notices,
        }
    }

    fn notify(&self, notice: CallNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }
}

pub struct SessionNegotiator {
    local: Identity,
    sink: Arc<dyn SignalSink>,
    engines: Arc<dyn MediaEngineFactory>,
    engine_events: mpsc::UnboundedSender<TaggedEngineEvent>,
    machine: CallStateMachine,
    session: Option<CallSession>,
    observers: CallObservers,
}

impl SessionNegotiator {
    pub fn new(
        local: Identity,
        sink: Arc<dyn SignalSink>,
        engines: Arc<dyn MediaEngineFactory>,
        engine_events: mpsc::UnboundedSender<TaggedEngineEvent>,
        observers: CallObservers,
    ) -> Self {
        Self {
            local,
            sink,
            engines,
            engine_events,
            machine: CallStateMachine::new(),
            session: None,
            observers,
        }
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    pub fn state(&self) -> CallState {
        self.machine.state()
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    /// Ring `target` through the relay. The offer follows the relay's answer.
    pub async fn start_call(&mut self, target: Identity) -> Result<()> {
        self.machine.check(Transition::StartCall)?;
        self.send_to(&target, Payload::StartCall)?;
        self.transition(Transition::StartCall)?;
        info!("Calling {}", target);
        self.session = Some(CallSession::new(target, Role::Caller));
        Ok(())
    }

    pub async fn on_call_response(&mut self, response: CallResponse) -> Result<()> {
        let awaiting = self
            .session
            .as_ref()
            .is_some_and(|s| s.role == Role::Caller && s.engine.is_none());
        if !awaiting {
            return Err(self.invalid(match response {
                CallResponse::Unreachable => Transition::CallResponseUnreachable,
                CallResponse::Accepted(_) => Transition::CallResponseOk,
            }));
        }

        match response {
            CallResponse::Unreachable => {
                self.transition(Transition::CallResponseUnreachable)?;
                let peer = self
                    .session
                    .take()
                    .map(|s| s.peer)
                    .unwrap_or_else(|| self.local.clone());
                info!("{} is not online", peer);
                self.observers
                    .notify(CallNotice::PeerUnreachable(peer.clone()));
                Err(SignalError::PeerUnreachable(peer))
            }
            CallResponse::Accepted(_) => {
                self.transition(Transition::CallResponseOk)?;
                self.initiate_offer().await
            }
        }
    }

    /// Create the local offer and send it to the peer.
    /// Only valid once per call, before any engine exists.
    pub async fn initiate_offer(&mut self) -> Result<()> {
        let fresh = self.machine.state() == CallState::Calling
            && self.session.as_ref().is_some_and(|s| {
                s.role == Role::Caller && s.engine.is_none() && !s.offer_sent
            });
        if !fresh {
            return Err(self.invalid_action("send offer"));
        }
        let result = self.create_and_send_offer().await;
        self.settle(result).await
    }

    async fn create_and_send_offer(&mut self) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(SignalError::NegotiationFailed("no call session".into()))?;
        let events = EngineEvents::new(session.id, self.engine_events.clone());
        let engine = session.engine.insert(self.engines.create(events).await?);

        let offer = engine.create_offer().await?;
        engine.set_local_description(offer.clone()).await?;

        let message = SignalMessage::to_peer(
            self.local.clone(),
            session.peer.clone(),
            Payload::Offer(offer.body),
        );
        self.sink.send(&message)?;
        session.offer_sent = true;
        debug!("Offer sent to {}", session.peer);
        Ok(())
    }

    /// An offer arrived: ring locally. The engine is not touched until accepted.
    pub async fn on_offer_received(&mut self, from: Identity, sdp: String) -> Result<()> {
        self.transition(Transition::OfferReceived)?;
        info!("Incoming call from {}", from);
        let mut session = CallSession::new(from.clone(), Role::Callee);
        session.remote_offer = Some(SessionDescriptor::offer(sdp));
        self.session = Some(session);
        self.observers.incoming.send_replace(Some(from));
        Ok(())
    }

    pub async fn accept_call(&mut self) -> Result<()> {
        self.transition(Transition::AcceptCall)?;
        self.observers.incoming.send_replace(None);
        let result = self.answer_offer().await;
        self.settle(result).await
    }

    async fn answer_offer(&mut self) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(SignalError::NegotiationFailed("no call session".into()))?;
        let offer = session
            .remote_offer
            .take()
            .ok_or(SignalError::NegotiationFailed("no offer to answer".into()))?;
        let events = EngineEvents::new(session.id, self.engine_events.clone());
        let engine = session.engine.insert(self.engines.create(events).await?);

        engine.set_remote_description(offer).await?;
        let answer = engine.create_answer().await?;
        engine.set_local_description(answer.clone()).await?;

        let message = SignalMessage::to_peer(
            self.local.clone(),
            session.peer.clone(),
            Payload::Answer(answer.body),
        );
        self.sink.send(&message)?;

        session.has_remote_description = true;
        session.drain_candidates().await?;
        info!("Answered call from {}", session.peer);
        self.transition(Transition::LocalAnswerSet)?;
        Ok(())
    }

    pub async fn reject_call(&mut self) -> Result<()> {
        self.transition(Transition::RejectCall)?;
        if let Some(session) = self.session.take() {
            info!("Rejected call from {}", session.peer);
        }
        self.observers.incoming.send_replace(None);
        Ok(())
    }

    pub async fn apply_answer(&mut self, from: Identity, sdp: String) -> Result<()> {
        self.machine.check(Transition::AnswerReceived)?;
        let expected = self
            .session
            .as_ref()
            .is_some_and(|s| s.role == Role::Caller && s.offer_sent && s.peer == from);
        if !expected {
            return Err(self.invalid(Transition::AnswerReceived));
        }
        let result = self.apply_remote_answer(sdp).await;
        self.settle(result).await
    }

    async fn apply_remote_answer(&mut self, sdp: String) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(SignalError::NegotiationFailed("no call session".into()))?;
        let engine = session
            .engine
            .as_ref()
            .ok_or(SignalError::NegotiationFailed("no media engine".into()))?;

        engine
            .set_remote_description(SessionDescriptor::answer(sdp))
            .await?;
        session.has_remote_description = true;
        session.drain_candidates().await?;
        info!("Call with {} connected", session.peer);
        self.transition(Transition::AnswerReceived)?;
        Ok(())
    }

    /// Apply a remote candidate now, or hold it until a remote description is set.
    pub async fn add_remote_candidate(
        &mut self,
        from: Identity,
        candidate: IceCandidateDescriptor,
    ) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(self.invalid_action("add candidate"));
        };
        if session.peer != from {
            warn!(
                "Dropping candidate from {}, current peer is {}",
                from, session.peer
            );
            return Ok(());
        }

        match session.engine.as_ref() {
            Some(engine) if session.has_remote_description => {
                let result = engine.add_ice_candidate(candidate).await;
                self.settle(result).await
            }
            _ => {
                session.pending_candidates.push_back(candidate);
                debug!(
                    "Buffered candidate from {} ({} pending)",
                    from,
                    session.pending_candidates.len()
                );
                Ok(())
            }
        }
    }

    /// Route an engine callback, ignoring ones from a session that is gone.
    pub async fn on_engine_event(&mut self, tagged: TaggedEngineEvent) -> Result<()> {
        if self.session.as_ref().map(|s| s.id) != Some(tagged.session) {
            debug!("Ignoring engine event from stale session {}", tagged.session);
            return Ok(());
        }
        match tagged.event {
            EngineEvent::LocalCandidate(candidate) => self.local_candidate_produced(candidate),
            EngineEvent::ConnectionStateChanged(state) => {
                self.on_connection_state(state).await;
                Ok(())
            }
            EngineEvent::RemoteStreamAdded(handle) => {
                debug!("Remote stream {:?} added", handle);
                self.observers.notify(CallNotice::RemoteStream(handle));
                Ok(())
            }
        }
    }

    fn local_candidate_produced(&mut self, candidate: IceCandidateDescriptor) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        let peer = session.peer.clone();
        self.send_to(&peer, Payload::IceCandidate(candidate))
    }

    async fn on_connection_state(&mut self, state: ConnectionState) {
        info!("Peer connection {}", state);
        if state.ends_call() {
            self.end_session().await;
        }
    }

    /// Tear down the live session. Calling it again once ended does nothing.
    pub async fn end_session(&mut self) {
        if self.machine.state() == CallState::Ended && self.session.is_none() {
            return;
        }
        if let Some(session) = self.session.take() {
            if let Some(engine) = session.engine {
                engine.close().await;
            }
            info!("Call with {} ended", session.peer);
        }
        let _ = self.transition(Transition::ConnectionClosedOrFailed);
        self.observers.incoming.send_replace(None);
        self.observers.notify(CallNotice::CallEnded);
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.transition(Transition::Reset)?;
        Ok(())
    }

    /// The relay link is gone; nothing can be signaled any more.
    pub async fn link_closed(&mut self) {
        if self.session.is_some() {
            self.end_session().await;
        }
        self.observers.notify(CallNotice::LinkClosed);
    }

    /// Turn a failed negotiation step into a teardown.
    async fn settle(&mut self, result: Result<()>) -> Result<()> {
        let Err(err) = result else {
            return Ok(());
        };
        let err = match err {
            SignalError::LinkClosed | SignalError::NegotiationFailed(_) => err,
            other => SignalError::NegotiationFailed(other.to_string()),
        };
        warn!("Negotiation aborted: {}", err);
        if let SignalError::NegotiationFailed(reason) = &err {
            self.observers
                .notify(CallNotice::NegotiationFailed(reason.clone()));
        }
        self.end_session().await;
        Err(err)
    }

    fn send_to(&self, target: &Identity, payload: Payload) -> Result<()> {
        let message = SignalMessage::to_peer(self.local.clone(), target.clone(), payload);
        self.sink.send(&message)
    }

    fn transition(&mut self, transition: Transition) -> Result<CallState> {
        let next = self.machine.apply(transition)?;
        self.observers.state.send_replace(next);
        Ok(next)
    }

    fn invalid(&self, transition: Transition) -> SignalError {
        self.invalid_action(transition.name())
    }

    fn invalid_action(&self, action: &'static str) -> SignalError {
        SignalError::InvalidTransition {
            state: self.machine.state(),
            action,
        }
    }
}
