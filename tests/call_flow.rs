use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use call_signal::media::{ConnectionState, MediaStreamHandle};
use call_signal::relay::{self, RelayState};
use call_signal::{
    CallClient, CallNotice, CallState, ClientConfig, EngineEvents, IceCandidateDescriptor,
    Identity, MediaEngine, MediaEngineFactory, Result, SessionDescriptor, SignalError,
};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

/// Engine that hands out canned descriptions and reports one local candidate
/// once its local description is set.
#[derive(Clone)]
struct LoopbackFactory {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl LoopbackFactory {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

struct LoopbackEngine {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    events: EngineEvents,
}

impl LoopbackEngine {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_offer(&self) -> Result<SessionDescriptor> {
        self.record("create_offer".into());
        Ok(SessionDescriptor::offer(format!("offer-from-{}", self.name)))
    }

    async fn create_answer(&self) -> Result<SessionDescriptor> {
        self.record("create_answer".into());
        Ok(SessionDescriptor::answer(format!("answer-from-{}", self.name)))
    }

    async fn set_local_description(&self, description: SessionDescriptor) -> Result<()> {
        self.record(format!("local:{}", description.body));
        self.events.local_candidate(IceCandidateDescriptor::new(
            "0",
            0,
            format!("candidate-of-{}", self.name),
        ));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescriptor) -> Result<()> {
        self.record(format!("remote:{}", description.body));
        self.events
            .remote_stream_added(MediaStreamHandle(format!("stream-of-{}", self.name)));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateDescriptor) -> Result<()> {
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.record("close".into());
        self.events.connection_state_changed(ConnectionState::Closed);
    }
}

#[async_trait]
impl MediaEngineFactory for LoopbackFactory {
    async fn create(&self, events: EngineEvents) -> Result<Box<dyn MediaEngine>> {
        Ok(Box::new(LoopbackEngine {
            name: self.name,
            log: self.log.clone(),
            events,
        }))
    }
}

async fn start_relay() -> (String, RelayState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = RelayState::new(Duration::from_secs(30));
    tokio::spawn(relay::serve(listener, state.clone()));
    (format!("ws://{}/", addr), state)
}

async fn connect(
    url: &str,
    name: &'static str,
    state: &RelayState,
) -> (CallClient, LoopbackFactory) {
    let engines = LoopbackFactory::new(name);
    let config = ClientConfig::new(url, Identity::from(name));
    let (client, _task) = CallClient::connect(&config, Arc::new(engines.clone()))
        .await
        .unwrap();
    while !state.is_online(&Identity::from(name)) {
        sleep(Duration::from_millis(5)).await;
    }
    (client, engines)
}

async fn wait_for_state(client: &CallClient, wanted: CallState) {
    let mut state = client.call_state();
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == wanted))
        .await
        .expect("timed out waiting for call state")
        .unwrap();
}

async fn wait_for_log(engines: &LoopbackFactory, entry: &str) {
    timeout(Duration::from_secs(5), async {
        while !engines.log().iter().any(|e| e == entry) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for engine call");
}

#[tokio::test]
async fn two_clients_connect_through_the_relay() {
    let (url, state) = start_relay().await;
    let (alice, alice_engine) = connect(&url, "alice", &state).await;
    let (bob, bob_engine) = connect(&url, "bob", &state).await;

    let mut ringing = bob.incoming_call();
    alice.start_call("bob").await.unwrap();

    timeout(Duration::from_secs(5), ringing.wait_for(|peer| peer.is_some()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*bob.incoming_call().borrow(), Some(Identity::from("alice")));
    assert_eq!(*bob.call_state().borrow(), CallState::Ringing);
    assert!(bob_engine.log().is_empty());

    // alice's candidate may reach bob before or after he answers
    bob.accept_call().await.unwrap();
    assert_eq!(*bob.call_state().borrow(), CallState::Connected);
    assert_eq!(*bob.incoming_call().borrow(), None);

    wait_for_state(&alice, CallState::Connected).await;
    wait_for_log(&alice_engine, "candidate:candidate-of-bob").await;
    wait_for_log(&bob_engine, "candidate:candidate-of-alice").await;

    let bob_log = bob_engine.log();
    let remote = bob_log.iter().position(|e| e == "remote:offer-from-alice").unwrap();
    let candidate = bob_log
        .iter()
        .position(|e| e == "candidate:candidate-of-alice")
        .unwrap();
    assert!(remote < candidate);
    assert!(alice_engine.log().contains(&"remote:answer-from-bob".to_string()));

    let mut alice_notices = alice.notices();
    alice.end_call().await.unwrap();
    assert_eq!(*alice.call_state().borrow(), CallState::Ended);
    while alice_notices.recv().await.unwrap() != CallNotice::CallEnded {}
    alice.reset().await.unwrap();
    assert_eq!(*alice.call_state().borrow(), CallState::Idle);
}

#[tokio::test]
async fn calling_an_offline_peer_reports_unreachable() {
    let (url, state) = start_relay().await;
    let (alice, alice_engine) = connect(&url, "alice", &state).await;
    let mut notices = alice.notices();

    alice.start_call("nobody").await.unwrap();
    let notice = timeout(Duration::from_secs(5), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice, CallNotice::PeerUnreachable(Identity::from("nobody")));
    assert_eq!(*alice.call_state().borrow(), CallState::Idle);
    assert!(alice_engine.log().is_empty());
}

#[tokio::test]
async fn rejected_call_leaves_both_sides_usable() {
    let (url, state) = start_relay().await;
    let (alice, _alice_engine) = connect(&url, "alice", &state).await;
    let (bob, bob_engine) = connect(&url, "bob", &state).await;

    let mut ringing = bob.incoming_call();
    alice.start_call("bob").await.unwrap();
    timeout(Duration::from_secs(5), ringing.wait_for(|peer| peer.is_some()))
        .await
        .unwrap()
        .unwrap();

    bob.reject_call().await.unwrap();
    assert_eq!(*bob.call_state().borrow(), CallState::Idle);
    assert!(bob_engine.log().is_empty());
    assert!(matches!(
        bob.accept_call().await,
        Err(SignalError::InvalidTransition { .. })
    ));

    alice.end_call().await.unwrap();
    alice.reset().await.unwrap();
    assert_eq!(*alice.call_state().borrow(), CallState::Idle);
}
