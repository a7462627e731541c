//! End-to-end call setup between two agents, through an in-process relay and
//! through the websocket relay.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

use zoomish::auth::{Admission, Claims};
use zoomish::media::SyntheticMediaSource;
use zoomish::peer::loopback::LoopbackConnector;
use zoomish::relay::{Relay, ws};
use zoomish::signaling::{RelayLink, SignalTransport, WsSignalClient};
use zoomish::{CallAgent, CallHandle, CallState, CallView, ClientId, EndReason, RelayMessage, Ringing};

async fn until(handle: &CallHandle, pred: impl FnMut(&CallView) -> bool) -> CallView {
    timeout(Duration::from_secs(5), handle.wait_for(pred))
        .await
        .expect("timed out waiting for call state")
        .expect("agent stopped")
}

async fn local_agent(relay: &Relay, id: &str, name: &str) -> (CallHandle, JoinHandle<()>) {
    let (link, inbox) = RelayLink::attach_as(relay, id.into()).unwrap();
    start(link, inbox, name).await
}

async fn start<T: SignalTransport>(
    transport: T,
    inbox: zoomish::relay::Inbox,
    name: &str,
) -> (CallHandle, JoinHandle<()>) {
    let media = SyntheticMediaSource::new(name);
    let (agent, handle) =
        CallAgent::new(&media, transport, inbox, Arc::new(LoopbackConnector), name).await;
    (handle, agent.spawn())
}

fn in_call(view: &CallView) -> bool {
    matches!(view.state, CallState::InCall { .. }) && view.remote.is_some()
}

fn ringing_in(view: &CallView) -> bool {
    matches!(view.state, CallState::Ringing(Ringing::Inbound { .. }))
}

async fn connect_both(alice: &CallHandle, bob: &CallHandle, bob_id: &ClientId) {
    alice.call_user(bob_id.clone()).await.unwrap();
    until(bob, ringing_in).await;
    bob.answer_call().await.unwrap();
    until(alice, in_call).await;
    until(bob, in_call).await;
}

#[tokio::test]
async fn alice_calls_bob_and_both_see_each_other() {
    let relay = Relay::new();
    let (alice, _a) = local_agent(&relay, "alice", "Alice").await;
    let (bob, _b) = local_agent(&relay, "bob", "Bob").await;
    until(&alice, |v| v.me.is_some()).await;

    alice.call_user("bob".into()).await.unwrap();
    let ringing = until(&bob, ringing_in).await;
    let CallState::Ringing(Ringing::Inbound { invite }) = ringing.state else {
        unreachable!();
    };
    assert_eq!(invite.from.as_str(), "alice");
    assert_eq!(invite.display_name, "Alice");
    assert_eq!(invite.signal.as_value()["type"], "offer");

    bob.answer_call().await.unwrap();
    let a = until(&alice, in_call).await;
    let b = until(&bob, in_call).await;

    assert_eq!(a.state, CallState::InCall { peer: "bob".into() });
    assert_eq!(b.state, CallState::InCall { peer: "alice".into() });
    assert_eq!(a.remote.unwrap().id, b.local.unwrap().id());
    assert_eq!(b.remote.unwrap().id, a.local.unwrap().id());
}

#[tokio::test]
async fn calling_an_absent_client_keeps_ringing() {
    let relay = Relay::new();
    let (alice, _a) = local_agent(&relay, "alice", "Alice").await;

    alice.call_user("ghost".into()).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    assert_eq!(
        alice.state(),
        CallState::Ringing(Ringing::Outbound { target: "ghost".into() })
    );
}

#[tokio::test]
async fn hanging_up_ends_the_call_on_both_sides() {
    let relay = Relay::new();
    let (alice, _a) = local_agent(&relay, "alice", "Alice").await;
    let (bob, _b) = local_agent(&relay, "bob", "Bob").await;
    connect_both(&alice, &bob, &"bob".into()).await;

    alice.leave_call().await.unwrap();
    alice.leave_call().await.unwrap();

    assert_eq!(alice.state(), CallState::Ended(EndReason::LocalHangup));
    let b = until(&bob, |v| matches!(v.state, CallState::Ended(_))).await;
    assert_eq!(b.state, CallState::Ended(EndReason::RemoteHangup));
    assert!(b.remote.is_none());
}

#[tokio::test]
async fn peer_vanishing_mid_call_ends_the_call() {
    let relay = Relay::new();
    let (alice, _a) = local_agent(&relay, "alice", "Alice").await;
    let (bob, bob_task) = local_agent(&relay, "bob", "Bob").await;
    connect_both(&alice, &bob, &"bob".into()).await;

    drop(bob);
    timeout(Duration::from_secs(5), bob_task).await.unwrap().unwrap();

    let a = until(&alice, |v| matches!(v.state, CallState::Ended(_))).await;
    assert_eq!(a.state, CallState::Ended(EndReason::PeerLeft));
    assert!(!relay.is_connected(&"bob".into()));
}

async fn serve(admission: Admission) -> String {
    let state = ws::AppState {
        relay: Relay::new(),
        admission,
        ping_interval: Duration::from_secs(30),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, ws::router(state)).await.unwrap();
    });
    format!("ws://{addr}/socket")
}

#[tokio::test]
async fn call_over_the_websocket_relay() {
    let url = serve(Admission::open()).await;
    let (alice_tx, alice_rx) = WsSignalClient::connect(&url, None).await.unwrap();
    let (bob_tx, bob_rx) = WsSignalClient::connect(&url, None).await.unwrap();
    let (alice, _a) = start(alice_tx, alice_rx, "Alice").await;
    let (bob, _b) = start(bob_tx, bob_rx, "Bob").await;

    let bob_id = until(&bob, |v| v.me.is_some()).await.me.unwrap();
    let alice_id = until(&alice, |v| v.me.is_some()).await.me.unwrap();
    connect_both(&alice, &bob, &bob_id).await;

    assert_eq!(alice.state(), CallState::InCall { peer: bob_id });
    assert_eq!(bob.state(), CallState::InCall { peer: alice_id });
}

#[tokio::test]
async fn malformed_frames_get_an_error_reply() {
    let url = serve(Admission::open()).await;
    let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    socket.send(Message::Text("not json".into())).await.unwrap();

    let mut replies = Vec::new();
    while replies.len() < 2 {
        let frame = timeout(Duration::from_secs(5), socket.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = frame {
            replies.push(serde_json::from_str::<RelayMessage>(text.as_str()).unwrap());
        }
    }
    assert!(matches!(replies[0], RelayMessage::Me { .. }));
    assert_eq!(
        replies[1],
        RelayMessage::Error {
            message: "MALFORMED_JSON".into()
        }
    );
}

#[tokio::test]
async fn relay_with_a_secret_requires_a_token() {
    let url = serve(Admission::with_secret("s3cret")).await;
    assert!(WsSignalClient::connect(&url, None).await.is_err());

    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize
        + 600;
    let claims = Claims {
        sub: "alice".into(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret("s3cret".as_bytes()),
    )
    .unwrap();
    let (_client, mut inbox) = WsSignalClient::connect(&url, Some(&token)).await.unwrap();
    let first = timeout(Duration::from_secs(5), inbox.recv()).await.unwrap();
    assert!(matches!(first, Some(RelayMessage::Me { .. })));
}
