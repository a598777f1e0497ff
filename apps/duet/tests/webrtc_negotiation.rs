use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use duet_client_core::media::{MediaBinding, MediaError};
use duet_client_core::peer::PeerState;
use duet_client_core::peer::rtc::{RtcConfig, RtcPeerConnector};
use duet_client_core::protocol::{NegotiationRole, SignalMessage};
use duet_client_core::transport::mock::{MockRelay, RelaySession};
use duet_client_core::{ClientConfig, EndpointIdentity, SessionEvent, SignalingClient};

/// One opus track out, remote tracks counted.
struct AudioMedia {
    id: &'static str,
    remote: Mutex<Vec<Arc<TrackRemote>>>,
}

impl AudioMedia {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            remote: Mutex::new(Vec::new()),
        }
    }
}

impl MediaBinding<Arc<dyn TrackLocal + Send + Sync>, Arc<TrackRemote>> for AudioMedia {
    fn local_tracks(&self) -> Result<Vec<Arc<dyn TrackLocal + Send + Sync>>, MediaError> {
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            format!("{}-audio", self.id),
            format!("{}-stream", self.id),
        );
        Ok(vec![Arc::new(track)])
    }

    fn on_remote_track(&self, track: Arc<TrackRemote>) {
        self.remote.lock().push(track);
    }

    fn stop_remote(&self) {
        self.remote.lock().clear();
    }
}

fn spawn_client(
    local: &str,
    remote: &str,
) -> (
    duet_client_core::SignalingHandle,
    MockRelay,
    broadcast::Receiver<SessionEvent>,
) {
    let (connector, relay) = MockRelay::new();
    let config = ClientConfig::default().with_heartbeat_interval(Duration::from_secs(300));
    let peers = RtcPeerConnector::new(RtcConfig::localhost()).expect("webrtc api");
    let client = SignalingClient::new(
        config,
        EndpointIdentity::new(local, remote).expect("identity"),
        connector,
        peers,
        AudioMedia::new("duet"),
    );
    let reports = client.subscribe();
    (client.spawn(), relay, reports)
}

/// Forwards every frame between the two endpoints, the way the relay does once
/// both have announced themselves.
async fn broker(mut left: RelaySession, mut right: RelaySession) {
    loop {
        tokio::select! {
            Some(text) = left.recv_text() => {
                right.send_text(&text);
            }
            Some(text) = right.recv_text() => {
                left.send_text(&text);
            }
            else => break,
        }
    }
}

async fn wait_connected(reports: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match reports.recv().await {
            Ok(SessionEvent::PeerStateChanged {
                state: PeerState::Connected,
                ..
            }) => return,
            Ok(SessionEvent::SignalingError {
                operation, reason, ..
            }) => panic!("{operation} failed: {reason}"),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(err) => panic!("report stream ended: {err}"),
        }
    }
}

#[test_timeout::tokio_timeout_test(60)]
async fn two_clients_negotiate_over_relay() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let (alice, mut alice_relay, mut alice_reports) = spawn_client("alice", "bob");
    let (bob, mut bob_relay, mut bob_reports) = spawn_client("bob", "alice");

    let mut alice_session = alice_relay.accept().await.expect("alice channel");
    let mut bob_session = bob_relay.accept().await.expect("bob channel");
    assert!(matches!(alice_session.recv().await, Some(SignalMessage::Open(_))));
    assert!(matches!(bob_session.recv().await, Some(SignalMessage::Open(_))));

    alice_session.send(&SignalMessage::Start(NegotiationRole::Offerer));
    bob_session.send(&SignalMessage::Start(NegotiationRole::Answerer));
    tokio::spawn(broker(alice_session, bob_session));

    timeout(Duration::from_secs(30), async {
        tokio::join!(
            wait_connected(&mut alice_reports),
            wait_connected(&mut bob_reports)
        )
    })
    .await
    .expect("peers connected");

    let alice_state = alice.snapshot().await.expect("alice snapshot");
    let bob_state = bob.snapshot().await.expect("bob snapshot");
    assert_eq!(alice_state.session.round, Some(1));
    assert_eq!(bob_state.session.round, Some(1));
    assert!(alice_state.session.remote_description_set);
    assert!(bob_state.session.remote_description_set);
    assert_eq!(bob_state.session.queued, 0);

    alice.shutdown().await;
    bob.shutdown().await;
}
