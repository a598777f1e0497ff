//! In-memory peer connections for exercising the session controller without a
//! network stack. Every call is recorded in a shared log.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::{
    NegotiationStep, PeerConnection, PeerConnector, PeerError, PeerEvents, PeerState, RoundId,
};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Opened { round: RoundId, tracks: Vec<String> },
    CreateOffer { round: RoundId },
    CreateAnswer { round: RoundId },
    SetLocal { round: RoundId, kind: SdpKind },
    SetRemote { round: RoundId, kind: SdpKind, sdp: String },
    AddCandidate { round: RoundId, candidate: String },
    Closed { round: RoundId },
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    failing: HashSet<NegotiationStep>,
    held: HashMap<NegotiationStep, Arc<Semaphore>>,
    events: HashMap<RoundId, PeerEvents<String>>,
    live: HashSet<RoundId>,
}

/// Cloneable handle; clones share the same log and knobs.
#[derive(Clone, Default)]
pub struct MockPeerConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockPeerConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Candidates applied to `round`, in application order.
    pub fn applied_candidates(&self, round: RoundId) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::AddCandidate { round: r, candidate } if *r == round => {
                    Some(candidate.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Rounds whose connection is open and not yet closed.
    pub fn live_rounds(&self) -> Vec<RoundId> {
        let mut rounds: Vec<_> = self.state.lock().live.iter().copied().collect();
        rounds.sort_unstable();
        rounds
    }

    pub fn latest_round(&self) -> Option<RoundId> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Opened { round, .. } => Some(*round),
                _ => None,
            })
            .max()
    }

    /// Makes every subsequent call of `step` fail until `succeed` is called.
    pub fn fail(&self, step: NegotiationStep) {
        self.state.lock().failing.insert(step);
    }

    pub fn succeed(&self, step: NegotiationStep) {
        self.state.lock().failing.remove(&step);
    }

    /// Parks every subsequent call of `step` until `release` is called.
    pub fn hold(&self, step: NegotiationStep) {
        self.state
            .lock()
            .held
            .insert(step, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, step: NegotiationStep) {
        if let Some(gate) = self.state.lock().held.remove(&step) {
            gate.close();
        }
    }

    /// Emits a locally gathered candidate from `round`'s connection.
    pub fn gather(&self, round: RoundId, candidate: &str) -> bool {
        let events = self.state.lock().events.get(&round).cloned();
        events.is_some_and(|events| events.local_candidate(IceCandidate::new(candidate)))
    }

    /// Delivers a remote track on `round`'s connection.
    pub fn deliver_track(&self, round: RoundId, track: &str) -> bool {
        let events = self.state.lock().events.get(&round).cloned();
        events.is_some_and(|events| events.remote_track(track.to_string()))
    }

    pub fn report_state(&self, round: RoundId, state: PeerState) -> bool {
        let events = self.state.lock().events.get(&round).cloned();
        events.is_some_and(|events| events.state_changed(state))
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }

    async fn gate(&self, step: NegotiationStep) -> Result<(), PeerError> {
        let held = self.state.lock().held.get(&step).cloned();
        if let Some(gate) = held {
            // Closed on release; the permit is never actually granted.
            let _ = gate.acquire().await;
        }
        if self.state.lock().failing.contains(&step) {
            return Err(PeerError::new(step, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnector for MockPeerConnector {
    type LocalTrack = String;
    type RemoteTrack = String;

    async fn open(
        &self,
        local_tracks: Vec<String>,
        events: PeerEvents<String>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        self.gate(NegotiationStep::OpenPeerConnection).await?;
        let round = events.round();
        {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Opened {
                round,
                tracks: local_tracks,
            });
            state.events.insert(round, events);
            state.live.insert(round);
        }
        Ok(Arc::new(MockPeerConnection {
            round,
            connector: self.clone(),
        }))
    }
}

struct MockPeerConnection {
    round: RoundId,
    connector: MockPeerConnector,
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.connector.gate(NegotiationStep::CreateOffer).await?;
        self.connector
            .record(MockCall::CreateOffer { round: self.round });
        Ok(SessionDescription::offer(format!("offer-{}", self.round)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.connector.gate(NegotiationStep::CreateAnswer).await?;
        self.connector
            .record(MockCall::CreateAnswer { round: self.round });
        Ok(SessionDescription::answer(format!("answer-{}", self.round)))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<SessionDescription, PeerError> {
        self.connector
            .gate(NegotiationStep::SetLocalDescription)
            .await?;
        self.connector.record(MockCall::SetLocal {
            round: self.round,
            kind: description.kind,
        });
        Ok(description)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.connector
            .gate(NegotiationStep::SetRemoteDescription)
            .await?;
        self.connector.record(MockCall::SetRemote {
            round: self.round,
            kind: description.kind,
            sdp: description.sdp,
        });
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.connector.gate(NegotiationStep::AddIceCandidate).await?;
        self.connector.record(MockCall::AddCandidate {
            round: self.round,
            candidate: candidate.candidate,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        let mut state = self.connector.state.lock();
        state.live.remove(&self.round);
        state.events.remove(&self.round);
        state.calls.push(MockCall::Closed { round: self.round });
        Ok(())
    }
}
