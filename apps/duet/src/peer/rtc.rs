use async_trait::async_trait;
use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{
    NegotiationStep, PeerConnection, PeerConnector, PeerError, PeerEvents, PeerState,
};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};

const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.stunprotocol.org:3478",
    "stun:stun.l.google.com:19302",
];

/// ICE configuration applied to every peer connection
#[derive(Debug, Clone)]
pub struct RtcConfig {
    pub ice_servers: Vec<RTCIceServer>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.to_string()],
                    ..Default::default()
                })
                .collect(),
        }
    }
}

impl RtcConfig {
    /// Defaults, overridden by `DUET_LOCALHOST_ONLY` (no ICE servers) or
    /// `DUET_ICE_SERVERS` (comma separated urls).
    pub fn from_env() -> Self {
        if std::env::var("DUET_LOCALHOST_ONLY").is_ok() {
            return Self::localhost();
        }
        match std::env::var("DUET_ICE_SERVERS") {
            Ok(list) if !list.trim().is_empty() => Self {
                ice_servers: list
                    .split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(|url| RTCIceServer {
                        urls: vec![url.to_string()],
                        ..Default::default()
                    })
                    .collect(),
            },
            _ => Self::default(),
        }
    }

    /// Host candidates only; no STUN/TURN.
    pub fn localhost() -> Self {
        Self {
            ice_servers: Vec::new(),
        }
    }

    pub fn with_ice_server_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            username,
            credential,
            ..Default::default()
        });
        self
    }
}

/// `PeerConnector` backed by webrtc-rs.
pub struct RtcPeerConnector {
    api: API,
    config: RtcConfig,
}

impl RtcPeerConnector {
    pub fn new(config: RtcConfig) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|err| PeerError::new(NegotiationStep::OpenPeerConnection, err))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|err| PeerError::new(NegotiationStep::OpenPeerConnection, err))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, config })
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;
    type RemoteTrack = Arc<TrackRemote>;

    async fn open(
        &self,
        local_tracks: Vec<Self::LocalTrack>,
        events: PeerEvents<Self::RemoteTrack>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let rtc_config = RTCConfiguration {
            ice_servers: self.config.ice_servers.clone(),
            ..Default::default()
        };
        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(rtc_config)
                .await
                .map_err(|err| PeerError::new(NegotiationStep::OpenPeerConnection, err))?,
        );
        let round = events.round();

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        events.local_candidate(candidate_from_init(init));
                    }
                    Err(err) => tracing::warn!(
                        target = "webrtc",
                        round = events.round(),
                        error = %err,
                        "failed to serialize local ice candidate"
                    ),
                }
            })
        }));

        let track_events = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    tracing::debug!(
                        target = "webrtc",
                        round = events.round(),
                        stream_id = %track.stream_id(),
                        kind = %track.kind(),
                        "remote track received"
                    );
                    events.remote_track(track);
                })
            },
        ));

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let events = state_events.clone();
                Box::pin(async move {
                    if let Some(state) = peer_state(state) {
                        events.state_changed(state);
                    }
                })
            },
        ));

        for track in local_tracks {
            if let Err(err) = peer_connection.add_track(track).await {
                let _ = peer_connection.close().await;
                return Err(PeerError::new(NegotiationStep::AttachLocalTrack, err));
            }
        }

        tracing::debug!(target = "webrtc", round, "peer connection created");
        Ok(Arc::new(RtcPeerConnection {
            inner: peer_connection,
        }))
    }
}

struct RtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self
            .inner
            .create_offer(None)
            .await
            .map_err(|err| PeerError::new(NegotiationStep::CreateOffer, err))?;
        description_from_rtc(offer, NegotiationStep::CreateOffer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .inner
            .create_answer(None)
            .await
            .map_err(|err| PeerError::new(NegotiationStep::CreateAnswer, err))?;
        description_from_rtc(answer, NegotiationStep::CreateAnswer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<SessionDescription, PeerError> {
        let step = NegotiationStep::SetLocalDescription;
        let rtc = description_to_rtc(&description, step)?;
        self.inner
            .set_local_description(rtc)
            .await
            .map_err(|err| PeerError::new(step, err))?;
        match self.inner.local_description().await {
            Some(installed) => description_from_rtc(installed, step),
            None => Ok(description),
        }
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        let step = NegotiationStep::SetRemoteDescription;
        let rtc = description_to_rtc(&description, step)?;
        self.inner
            .set_remote_description(rtc)
            .await
            .map_err(|err| PeerError::new(step, err))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.inner
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|err| PeerError::new(NegotiationStep::AddIceCandidate, err))
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.inner
            .close()
            .await
            .map_err(|err| PeerError::new(NegotiationStep::Close, err))
    }
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn description_from_rtc(
    description: RTCSessionDescription,
    step: NegotiationStep,
) -> Result<SessionDescription, PeerError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(PeerError::new(step, "session description has no type"));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

fn description_to_rtc(
    description: &SessionDescription,
    step: NegotiationStep,
) -> Result<RTCSessionDescription, PeerError> {
    let sdp = description.sdp.clone();
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpKind::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback.sdp = sdp;
            return Ok(rollback);
        }
    };
    parsed.map_err(|err| PeerError::new(step, err))
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_public_stun() {
        let config = RtcConfig::default();
        let urls: Vec<_> = config
            .ice_servers
            .iter()
            .flat_map(|server| server.urls.clone())
            .collect();
        assert_eq!(
            urls,
            vec![
                "stun:stun.stunprotocol.org:3478".to_string(),
                "stun:stun.l.google.com:19302".to_string(),
            ]
        );
        assert!(RtcConfig::localhost().ice_servers.is_empty());
    }

    #[test]
    fn credentialed_servers_are_appended() {
        let config = RtcConfig::localhost().with_ice_server_credentials(
            vec!["turn:turn.example.net:3478".into()],
            "duet".into(),
            "secret".into(),
        );
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].username, "duet");
        assert_eq!(config.ice_servers[0].credential, "secret");
    }

    #[test]
    fn unspecified_descriptions_are_rejected() {
        let err = description_from_rtc(
            RTCSessionDescription::default(),
            NegotiationStep::CreateOffer,
        )
        .unwrap_err();
        assert_eq!(err.step, NegotiationStep::CreateOffer);
    }

    #[test]
    fn malformed_remote_sdp_reports_the_step() {
        let err = description_to_rtc(
            &SessionDescription::offer("definitely not sdp"),
            NegotiationStep::SetRemoteDescription,
        )
        .unwrap_err();
        assert_eq!(err.step, NegotiationStep::SetRemoteDescription);
    }

    #[test]
    fn candidate_fields_survive_conversion() {
        let candidate = candidate_from_init(RTCIceCandidateInit {
            candidate: "candidate:1 1 udp 1 127.0.0.1 9 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("frag".into()),
        });
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment.as_deref(), Some("frag"));
    }

    #[test]
    fn connection_states_map_one_to_one() {
        assert_eq!(
            peer_state(RTCPeerConnectionState::Connected),
            Some(PeerState::Connected)
        );
        assert_eq!(
            peer_state(RTCPeerConnectionState::Failed),
            Some(PeerState::Failed)
        );
        assert_eq!(peer_state(RTCPeerConnectionState::Unspecified), None);
    }
}
