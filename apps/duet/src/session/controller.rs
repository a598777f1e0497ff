use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use super::{EndpointIdentity, SessionEvent, SessionSnapshot, SessionState};
use crate::control::SignalSink;
use crate::media::MediaBinding;
use crate::negotiation::NegotiationQueue;
use crate::peer::worker::{PeerOp, RoundWorker};
use crate::peer::{PeerConnector, PeerEvent, PeerEvents, PeerOutcome, PeerState, RoundId};
use crate::protocol::{NegotiationRole, SdpKind, SignalMessage};

type PeerEventSender<R> = mpsc::UnboundedSender<(RoundId, PeerEvent<R>)>;

struct ActiveRound {
    round: RoundId,
    role: NegotiationRole,
    worker: RoundWorker,
    remote_description_set: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Message fully handled; nothing more happens for it.
    Done,
    /// Fall through to draining the negotiation queue.
    Drain,
}

/// Drives one peer connection at a time through negotiation.
///
/// Owned by the client event loop. Inbound signaling goes through
/// [`handle_inbound`](Self::handle_inbound); everything the round worker and
/// peer callbacks report comes back through
/// [`handle_peer_event`](Self::handle_peer_event), tagged with the round it
/// belongs to.
pub struct PeerSession<P: PeerConnector, M> {
    identity: EndpointIdentity,
    connector: Arc<P>,
    media: Arc<M>,
    receive_only_fallback: bool,
    peer_events: PeerEventSender<P::RemoteTrack>,
    reports: broadcast::Sender<SessionEvent>,
    next_round: RoundId,
    current: Option<ActiveRound>,
    queue: NegotiationQueue<SignalMessage>,
    state: SessionState,
}

impl<P, M> PeerSession<P, M>
where
    P: PeerConnector,
    M: MediaBinding<P::LocalTrack, P::RemoteTrack>,
{
    pub fn new(
        identity: EndpointIdentity,
        connector: Arc<P>,
        media: Arc<M>,
        receive_only_fallback: bool,
        peer_events: PeerEventSender<P::RemoteTrack>,
        reports: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            identity,
            connector,
            media,
            receive_only_fallback,
            peer_events,
            reports,
            next_round: 0,
            current: None,
            queue: NegotiationQueue::new(),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_round(&self) -> Option<RoundId> {
        self.current.as_ref().map(|active| active.round)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            round: self.current_round(),
            remote_description_set: self
                .current
                .as_ref()
                .is_some_and(|active| active.remote_description_set),
            queued: self.queue.len(),
        }
    }

    /// Replaces whatever peer connection exists with a fresh one for `role`.
    pub fn start_negotiation(&mut self, role: NegotiationRole) {
        self.teardown_peer();
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(target = "signaling", dropped, "discarded queued signaling");
        }

        let local_tracks = match self.media.local_tracks() {
            Ok(tracks) => tracks,
            Err(err) => {
                self.report(SessionEvent::MediaUnavailable {
                    reason: err.to_string(),
                });
                if !self.receive_only_fallback {
                    tracing::warn!(target = "signaling", role = role.as_str(), error = %err, "local media unavailable; not negotiating");
                    self.set_state(SessionState::Idle);
                    return;
                }
                tracing::warn!(target = "signaling", role = role.as_str(), error = %err, "local media unavailable; negotiating receive-only");
                Vec::new()
            }
        };

        self.next_round += 1;
        let round = self.next_round;
        tracing::info!(
            target = "signaling",
            round,
            role = role.as_str(),
            tracks = local_tracks.len(),
            "starting negotiation"
        );
        let events = PeerEvents::new(round, self.peer_events.clone());
        let worker = RoundWorker::spawn(self.connector.clone(), local_tracks, events);
        if role == NegotiationRole::Offerer {
            worker.submit(PeerOp::CreateOffer);
        }
        self.current = Some(ActiveRound {
            round,
            role,
            worker,
            remote_description_set: false,
        });
        self.set_state(SessionState::Negotiating);
    }

    /// Dispatches one inbound signaling message, then drains any queued
    /// messages that became applicable.
    pub fn handle_inbound(&mut self, message: SignalMessage, sink: &dyn SignalSink) {
        let mut next = Some(message);
        while let Some(message) = next.take() {
            if self.dispatch(message, sink) == Flow::Done {
                return;
            }
            next = self.pop_ready();
        }
    }

    pub fn handle_peer_event(
        &mut self,
        round: RoundId,
        event: PeerEvent<P::RemoteTrack>,
        sink: &dyn SignalSink,
    ) {
        if self.current_round() != Some(round) {
            tracing::trace!(target = "signaling", round, "dropping event from replaced peer connection");
            return;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                sink.send_signal(SignalMessage::IceCandidate {
                    candidate,
                    remote: Some(self.identity.remote().to_string()),
                });
            }
            PeerEvent::RemoteTrack(track) => {
                tracing::debug!(target = "signaling", round, "remote track received");
                self.media.on_remote_track(track);
            }
            PeerEvent::StateChanged(state) => self.on_peer_state(round, state),
            PeerEvent::Completed(outcome) => self.on_completed(round, outcome, sink),
        }
    }

    /// Ends the session from our side: tells the remote, stops rendering and
    /// drops the peer connection.
    pub fn hangup(&mut self, sink: &dyn SignalSink) {
        tracing::info!(target = "signaling", round = ?self.current_round(), "hanging up");
        sink.send_signal(SignalMessage::Close);
        self.media.stop_remote();
        self.teardown();
    }

    /// Drops the peer connection and anything queued for it.
    pub fn teardown(&mut self) {
        self.teardown_peer();
        self.queue.clear();
        self.set_state(SessionState::Idle);
    }

    fn teardown_peer(&mut self) {
        if let Some(active) = self.current.take() {
            tracing::debug!(
                target = "signaling",
                round = active.round,
                role = active.role.as_str(),
                "tearing down peer connection"
            );
            drop(active.worker);
        }
    }

    fn dispatch(&mut self, message: SignalMessage, sink: &dyn SignalSink) -> Flow {
        let message = match message {
            SignalMessage::Start(role) => {
                self.start_negotiation(role);
                return Flow::Done;
            }
            SignalMessage::Close => {
                tracing::info!(target = "signaling", round = ?self.current_round(), "remote closed session");
                self.media.stop_remote();
                self.teardown();
                return Flow::Done;
            }
            SignalMessage::Ping => {
                sink.send_signal(SignalMessage::Pong);
                return Flow::Done;
            }
            other => other,
        };

        let Some(active) = self.current.as_mut() else {
            tracing::debug!(target = "signaling", kind = message.kind(), "no peer connection; ignoring");
            return Flow::Done;
        };

        match message {
            SignalMessage::SessionDescription { sdp, .. } => match sdp.kind {
                SdpKind::Offer => {
                    tracing::debug!(target = "signaling", round = active.round, "remote offer");
                    active.worker.submit(PeerOp::AcceptOffer(sdp));
                }
                SdpKind::Answer => {
                    tracing::debug!(target = "signaling", round = active.round, "remote answer");
                    active.worker.submit(PeerOp::AcceptAnswer(sdp));
                }
                kind => {
                    tracing::debug!(target = "signaling", round = active.round, ?kind, "ignoring session description");
                }
            },
            SignalMessage::IceCandidate { candidate, remote } => {
                if !active.remote_description_set {
                    tracing::trace!(target = "signaling", round = active.round, "queueing candidate until remote description is set");
                    self.queue
                        .push(SignalMessage::IceCandidate { candidate, remote });
                    return Flow::Done;
                }
                active.worker.submit(PeerOp::AddCandidate(candidate));
            }
            // Open / Pong carry nothing for the peer connection.
            _ => {}
        }
        Flow::Drain
    }

    fn pop_ready(&mut self) -> Option<SignalMessage> {
        let ready = self
            .current
            .as_ref()
            .is_some_and(|active| active.remote_description_set);
        if ready { self.queue.pop() } else { None }
    }

    fn on_completed(&mut self, round: RoundId, outcome: PeerOutcome, sink: &dyn SignalSink) {
        match outcome {
            PeerOutcome::LocalDescription(sdp) => {
                tracing::debug!(target = "signaling", round, kind = ?sdp.kind, "sending local description");
                sink.send_signal(SignalMessage::SessionDescription {
                    sdp,
                    remote: Some(self.identity.remote().to_string()),
                });
            }
            PeerOutcome::RemoteApplied { answer } => {
                if let Some(answer) = answer {
                    tracing::debug!(target = "signaling", round, "sending answer");
                    sink.send_signal(SignalMessage::SessionDescription {
                        sdp: answer,
                        remote: Some(self.identity.remote().to_string()),
                    });
                }
                if let Some(active) = self.current.as_mut() {
                    active.remote_description_set = true;
                }
                if let Some(next) = self.pop_ready() {
                    self.handle_inbound(next, sink);
                }
            }
            PeerOutcome::CandidateApplied => {
                tracing::trace!(target = "signaling", round, "remote candidate applied");
            }
            PeerOutcome::Failed(err) => {
                tracing::warn!(
                    target = "signaling",
                    round,
                    operation = err.step.as_str(),
                    reason = %err.reason,
                    "negotiation step failed"
                );
                self.report(SessionEvent::SignalingError {
                    round,
                    operation: err.step,
                    reason: err.reason,
                });
            }
        }
    }

    fn on_peer_state(&mut self, round: RoundId, state: PeerState) {
        tracing::debug!(target = "signaling", round, ?state, "peer connection state");
        self.report(SessionEvent::PeerStateChanged { round, state });
        match state {
            PeerState::Connected => self.set_state(SessionState::Connected),
            PeerState::Failed => {
                tracing::warn!(target = "signaling", round, "peer connection failed");
            }
            _ => {}
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(target = "signaling", from = %self.state, to = %state, "session state");
            self.state = state;
            self.report(SessionEvent::SessionStateChanged(state));
        }
    }

    fn report(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.reports.send(event);
    }
}
