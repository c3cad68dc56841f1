//! The call task and its handle.
//!
//! One task owns the [`SessionNegotiator`]. Relay frames, UI commands and media
//! engine callbacks all reach it over channels and are handled one at a time,
//! so call state is never touched from two places at once.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::call_state::CallState;
use crate::config::ClientConfig;
use crate::error::{Result, SignalError};
use crate::media::{MediaEngineFactory, TaggedEngineEvent};
use crate::negotiator::{CallNotice, CallObservers, SessionNegotiator};
use crate::protocol::Identity;
use crate::router::SignalingRouter;
use crate::transport::{LinkEvent, SignalSink, TransportLink};

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    StartCall(Identity, Reply),
    AcceptCall(Reply),
    RejectCall(Reply),
    EndCall(Reply),
    Reset(Reply),
    Shutdown,
}

/// Handle to a running call task. Cheap to clone.
#[derive(Clone)]
pub struct CallClient {
    identity: Identity,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<CallState>,
    incoming: watch::Receiver<Option<Identity>>,
    notices: broadcast::Sender<CallNotice>,
}

impl CallClient {
    /// Connect to the configured relay and start the call task.
    pub async fn connect(
        config: &ClientConfig,
        engines: Arc<dyn MediaEngineFactory>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let (link, link_events) = TransportLink::open(
            &config.relay_url,
            config.identity.clone(),
            config.ping_interval,
        )
        .await?;
        Ok(Self::spawn(
            config.identity.clone(),
            Arc::new(link),
            link_events,
            engines,
        ))
    }

    /// Start the call task over an already open link.
    pub fn spawn(
        identity: Identity,
        sink: Arc<dyn SignalSink>,
        link_events: mpsc::UnboundedReceiver<LinkEvent>,
        engines: Arc<dyn MediaEngineFactory>,
    ) -> (Self, JoinHandle<()>) {
        let observers = CallObservers::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let client = Self {
            identity: identity.clone(),
            commands: command_tx,
            state: observers.state.subscribe(),
            incoming: observers.incoming.subscribe(),
            notices: observers.notices.clone(),
        };

        let negotiator = SessionNegotiator::new(
            identity.clone(),
            sink.clone(),
            engines,
            engine_tx,
            observers,
        );
        let task = CallTask {
            negotiator,
            router: SignalingRouter::new(identity),
            sink,
        };
        let handle = tokio::spawn(task.run(command_rx, link_events, engine_rx));
        (client, handle)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn start_call(&self, target: impl Into<Identity>) -> Result<()> {
        let target = target.into();
        self.request(|reply| Command::StartCall(target, reply)).await
    }

    pub async fn accept_call(&self) -> Result<()> {
        self.request(Command::AcceptCall).await
    }

    pub async fn reject_call(&self) -> Result<()> {
        self.request(Command::RejectCall).await
    }

    pub async fn end_call(&self) -> Result<()> {
        self.request(Command::EndCall).await
    }

    /// Return to idle after a call has ended.
    pub async fn reset(&self) -> Result<()> {
        self.request(Command::Reset).await
    }

    /// Who is calling us right now, if anyone.
    pub fn incoming_call(&self) -> watch::Receiver<Option<Identity>> {
        self.incoming.clone()
    }

    pub fn call_state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<CallNotice> {
        self.notices.subscribe()
    }

    /// End any live call, close the relay link and stop the task.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_| SignalError::LinkClosed)?;
        reply_rx.await.map_err(|_| SignalError::LinkClosed)?
    }
}

struct CallTask {
    negotiator: SessionNegotiator,
    router: SignalingRouter,
    sink: Arc<dyn SignalSink>,
}

impl CallTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
        mut engine_events: mpsc::UnboundedReceiver<TaggedEngineEvent>,
    ) {
        info!("Call task for {} started", self.negotiator.local());
        let mut link_open = true;

        loop {
            // Inbound traffic first, so frames already queued are seen before
            // a command that was issued after them.
            tokio::select! {
                biased;

                event = link_events.recv(), if link_open => match event {
                    Some(LinkEvent::Frame(text)) => {
                        let _ = self.router.dispatch(&mut self.negotiator, &text).await;
                    }
                    Some(LinkEvent::Closed) | None => {
                        warn!("Relay link lost");
                        link_open = false;
                        self.sink.close();
                        self.negotiator.link_closed().await;
                    }
                },
                Some(event) = engine_events.recv() => {
                    if let Err(e) = self.negotiator.on_engine_event(event).await {
                        warn!("Engine event not applied: {}", e);
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        if self.negotiator.session().is_some() {
            self.negotiator.end_session().await;
        }
        self.sink.close();
        info!("Call task for {} stopped", self.negotiator.local());
    }

    async fn handle_command(&mut self, command: Command) {
        let (result, reply) = match command {
            Command::StartCall(target, reply) => (self.negotiator.start_call(target).await, reply),
            Command::AcceptCall(reply) => (self.negotiator.accept_call().await, reply),
            Command::RejectCall(reply) => (self.negotiator.reject_call().await, reply),
            Command::EndCall(reply) => {
                self.negotiator.end_session().await;
                (Ok(()), reply)
            }
            Command::Reset(reply) => (self.negotiator.reset().await, reply),
            Command::Shutdown => return,
        };
        if let Err(e) = &result {
            debug!("Command rejected: {}", e);
        }
        let _ = reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::codec;
    use crate::media::testing::{EngineCall, RecordingFactory};
    use crate::media::ConnectionState;
    use crate::protocol::{Payload, SignalMessage};

    #[derive(Default)]
    struct ChannelSink {
        sent: Mutex<Vec<SignalMessage>>,
        closed: Mutex<bool>,
    }

    impl SignalSink for ChannelSink {
        fn send(&self, message: &SignalMessage) -> Result<()> {
            if *self.closed.lock().unwrap() {
                return Err(SignalError::LinkClosed);
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn frame(value: serde_json::Value) -> LinkEvent {
        LinkEvent::Frame(value.to_string())
    }

    #[tokio::test]
    async fn incoming_call_is_observable_and_answerable() {
        let sink = Arc::new(ChannelSink::default());
        let engines = RecordingFactory::default();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (client, _task) =
            CallClient::spawn("B".into(), sink.clone(), link_rx, Arc::new(engines.clone()));

        let mut incoming = client.incoming_call();
        link_tx
            .send(frame(json!({"type": "offer_received", "sender": "A", "target": "B", "data": "sdp"})))
            .unwrap();
        incoming.changed().await.unwrap();
        assert_eq!(*incoming.borrow(), Some(Identity::from("A")));

        link_tx
            .send(LinkEvent::Frame("{not json".into()))
            .unwrap();
        link_tx
            .send(frame(json!({
                "type": "ice_candidate", "sender": "A", "target": "B",
                "data": {"sdpMid": "0", "sdpMLineIndex": 0, "sdpCandidate": "c0"}
            })))
            .unwrap();

        client.accept_call().await.unwrap();
        assert_eq!(*client.call_state().borrow(), CallState::Connected);
        assert_eq!(engines.applied_candidates().len(), 1);

        let sent = sink.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![SignalMessage::to_peer("B".into(), "A".into(), Payload::Answer("answer-sdp".into()))]
        );
    }

    #[tokio::test]
    async fn engine_callbacks_run_on_the_call_task() {
        let sink = Arc::new(ChannelSink::default());
        let engines = RecordingFactory::default();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (client, _task) =
            CallClient::spawn("A".into(), sink.clone(), link_rx, Arc::new(engines.clone()));
        let mut notices = client.notices();

        client.start_call("B").await.unwrap();
        link_tx
            .send(frame(json!({"type": "call_response", "sender": "B", "target": "A", "data": "ok"})))
            .unwrap();
        link_tx
            .send(frame(json!({"type": "answer_received", "sender": "B", "target": "A", "data": "answer"})))
            .unwrap();

        let mut state = client.call_state();
        state
            .wait_for(|s| *s == CallState::Connected)
            .await
            .unwrap();

        let events = engines.events().unwrap();
        events.connection_state_changed(ConnectionState::Disconnected);
        state.wait_for(|s| *s == CallState::Ended).await.unwrap();
        assert_eq!(engines.calls().last(), Some(&EngineCall::Close));

        loop {
            if notices.recv().await.unwrap() == CallNotice::CallEnded {
                break;
            }
        }
        client.reset().await.unwrap();
        assert_eq!(*client.call_state().borrow(), CallState::Idle);
    }

    #[tokio::test]
    async fn invalid_commands_are_reported_not_fatal() {
        let sink = Arc::new(ChannelSink::default());
        let engines = RecordingFactory::default();
        let (_link_tx, link_rx) = mpsc::unbounded_channel();
        let (client, _task) =
            CallClient::spawn("A".into(), sink, link_rx, Arc::new(engines.clone()));

        let err = client.accept_call().await.unwrap_err();
        assert!(matches!(err, SignalError::InvalidTransition { .. }));
        client.start_call("B").await.unwrap();
        assert_eq!(*client.call_state().borrow(), CallState::Calling);
        assert!(engines.calls().is_empty());
    }

    #[tokio::test]
    async fn lost_link_ends_the_call_and_fails_later_sends() {
        let sink = Arc::new(ChannelSink::default());
        let engines = RecordingFactory::default();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (client, _task) =
            CallClient::spawn("A".into(), sink.clone(), link_rx, Arc::new(engines));
        let mut notices = client.notices();

        client.start_call("B").await.unwrap();
        link_tx.send(LinkEvent::Closed).unwrap();

        loop {
            if notices.recv().await.unwrap() == CallNotice::LinkClosed {
                break;
            }
        }
        assert_eq!(*client.call_state().borrow(), CallState::Ended);
        client.reset().await.unwrap();
        assert_eq!(client.start_call("B").await, Err(SignalError::LinkClosed));

        let first = codec::encode(&sink.sent.lock().unwrap()[0]);
        assert!(first.contains("start_call"));
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let (_link_tx, link_rx) = mpsc::unbounded_channel();
        let (client, task) = CallClient::spawn(
            "A".into(),
            Arc::new(ChannelSink::default()),
            link_rx,
            Arc::new(RecordingFactory::default()),
        );
        client.shutdown();
        task.await.unwrap();
        assert_eq!(client.end_call().await, Err(SignalError::LinkClosed));
    }
}
