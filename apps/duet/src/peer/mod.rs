use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{IceCandidate, SessionDescription};

pub mod mock;
pub mod rtc;
pub(crate) mod worker;

/// Identifies one peer-connection instance. Every negotiation round gets a new one.
pub type RoundId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationStep {
    OpenPeerConnection,
    AttachLocalTrack,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    Close,
}

impl NegotiationStep {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationStep::OpenPeerConnection => "open_peer_connection",
            NegotiationStep::AttachLocalTrack => "attach_local_track",
            NegotiationStep::CreateOffer => "create_offer",
            NegotiationStep::CreateAnswer => "create_answer",
            NegotiationStep::SetLocalDescription => "set_local_description",
            NegotiationStep::SetRemoteDescription => "set_remote_description",
            NegotiationStep::AddIceCandidate => "add_ice_candidate",
            NegotiationStep::Close => "close",
        }
    }
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{step} failed: {reason}")]
pub struct PeerError {
    pub step: NegotiationStep,
    pub reason: String,
}

impl PeerError {
    pub fn new(step: NegotiationStep, reason: impl fmt::Display) -> Self {
        Self {
            step,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One live peer connection. Implementations only need to be safe to call from
/// the round worker, which issues operations one at a time.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    /// Installs `description` and returns the local description as the
    /// connection now reports it.
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<SessionDescription, PeerError>;

    async fn set_remote_description(&self, description: SessionDescription)
    -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}

/// Builds peer connections for negotiation rounds.
#[async_trait]
pub trait PeerConnector: Send + Sync + 'static {
    type LocalTrack: Send + 'static;
    type RemoteTrack: Send + 'static;

    /// Creates a connection with `local_tracks` attached, wiring its candidate,
    /// track and state callbacks into `events`.
    async fn open(
        &self,
        local_tracks: Vec<Self::LocalTrack>,
        events: PeerEvents<Self::RemoteTrack>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// Completion of an operation submitted to a round worker.
#[derive(Debug)]
pub enum PeerOutcome {
    /// Offer created and installed locally; ready to send.
    LocalDescription(SessionDescription),
    /// Remote description installed. For a remote offer, carries the answer
    /// that was created and installed in response (if that succeeded).
    RemoteApplied { answer: Option<SessionDescription> },
    CandidateApplied,
    Failed(PeerError),
}

#[derive(Debug)]
pub enum PeerEvent<R> {
    LocalCandidate(IceCandidate),
    RemoteTrack(R),
    StateChanged(PeerState),
    Completed(PeerOutcome),
}

/// Sink for everything a peer connection reports, tagged with its round so
/// the session controller can discard reports from connections it replaced.
pub struct PeerEvents<R> {
    round: RoundId,
    tx: mpsc::UnboundedSender<(RoundId, PeerEvent<R>)>,
}

impl<R> PeerEvents<R> {
    pub fn new(round: RoundId, tx: mpsc::UnboundedSender<(RoundId, PeerEvent<R>)>) -> Self {
        Self { round, tx }
    }

    pub fn round(&self) -> RoundId {
        self.round
    }

    /// Returns false once the session controller has gone away.
    pub fn local_candidate(&self, candidate: IceCandidate) -> bool {
        self.emit(PeerEvent::LocalCandidate(candidate))
    }

    pub fn remote_track(&self, track: R) -> bool {
        self.emit(PeerEvent::RemoteTrack(track))
    }

    pub fn state_changed(&self, state: PeerState) -> bool {
        self.emit(PeerEvent::StateChanged(state))
    }

    pub(crate) fn completed(&self, outcome: PeerOutcome) -> bool {
        self.emit(PeerEvent::Completed(outcome))
    }

    fn emit(&self, event: PeerEvent<R>) -> bool {
        self.tx.send((self.round, event)).is_ok()
    }
}

impl<R> Clone for PeerEvents<R> {
    fn clone(&self) -> Self {
        Self {
            round: self.round,
            tx: self.tx.clone(),
        }
    }
}
