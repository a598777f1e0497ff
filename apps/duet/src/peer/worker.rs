use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::{PeerConnection, PeerConnector, PeerError, PeerEvents, PeerOutcome};
use crate::protocol::{IceCandidate, SessionDescription};

#[derive(Debug)]
pub(crate) enum PeerOp {
    CreateOffer,
    AcceptOffer(SessionDescription),
    AcceptAnswer(SessionDescription),
    AddCandidate(IceCandidate),
}

impl PeerOp {
    fn label(&self) -> &'static str {
        match self {
            PeerOp::CreateOffer => "create_offer",
            PeerOp::AcceptOffer(_) => "accept_offer",
            PeerOp::AcceptAnswer(_) => "accept_answer",
            PeerOp::AddCandidate(_) => "add_candidate",
        }
    }
}

/// Owns one peer connection for the lifetime of a negotiation round.
///
/// Operations run strictly in submission order and report back through
/// `PeerEvents`. Dropping the worker interrupts any in-flight operation and
/// closes the connection.
pub(crate) struct RoundWorker {
    ops: mpsc::UnboundedSender<PeerOp>,
    _shutdown: oneshot::Sender<()>,
}

impl RoundWorker {
    pub(crate) fn spawn<P: PeerConnector>(
        connector: Arc<P>,
        local_tracks: Vec<P::LocalTrack>,
        events: PeerEvents<P::RemoteTrack>,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(run(connector, local_tracks, events, ops_rx, shutdown_rx));
        Self {
            ops: ops_tx,
            _shutdown: shutdown_tx,
        }
    }

    pub(crate) fn submit(&self, op: PeerOp) -> bool {
        self.ops.send(op).is_ok()
    }
}

async fn run<P: PeerConnector>(
    connector: Arc<P>,
    local_tracks: Vec<P::LocalTrack>,
    events: PeerEvents<P::RemoteTrack>,
    mut ops: mpsc::UnboundedReceiver<PeerOp>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let round = events.round();
    let opened = tokio::select! {
        biased;
        _ = &mut shutdown => {
            tracing::debug!(target = "signaling", round, "round replaced before peer connection opened");
            return;
        }
        result = connector.open(local_tracks, events.clone()) => result,
    };
    let connection = match opened {
        Ok(connection) => connection,
        Err(err) => {
            events.completed(PeerOutcome::Failed(err));
            return;
        }
    };

    loop {
        let op = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            op = ops.recv() => op,
        };
        let Some(op) = op else { break };
        let label = op.label();
        tracing::trace!(target = "signaling", round, op = label, "peer operation start");
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::debug!(target = "signaling", round, op = label, "peer operation abandoned");
                break;
            }
            () = execute(connection.as_ref(), op, &events) => {}
        }
    }

    if let Err(err) = connection.close().await {
        tracing::debug!(target = "signaling", round, error = %err, "peer connection close failed");
    } else {
        tracing::debug!(target = "signaling", round, "peer connection closed");
    }
}

async fn execute<R>(connection: &dyn PeerConnection, op: PeerOp, events: &PeerEvents<R>) {
    let outcome = match op {
        PeerOp::CreateOffer => match create_local(connection, true).await {
            Ok(offer) => PeerOutcome::LocalDescription(offer),
            Err(err) => PeerOutcome::Failed(err),
        },
        PeerOp::AcceptOffer(offer) => {
            if let Err(err) = connection.set_remote_description(offer).await {
                events.completed(PeerOutcome::Failed(err));
                return;
            }
            let answer = match create_local(connection, false).await {
                Ok(answer) => Some(answer),
                Err(err) => {
                    events.completed(PeerOutcome::Failed(err));
                    None
                }
            };
            PeerOutcome::RemoteApplied { answer }
        }
        PeerOp::AcceptAnswer(answer) => match connection.set_remote_description(answer).await {
            Ok(()) => PeerOutcome::RemoteApplied { answer: None },
            Err(err) => PeerOutcome::Failed(err),
        },
        PeerOp::AddCandidate(candidate) => match connection.add_ice_candidate(candidate).await {
            Ok(()) => PeerOutcome::CandidateApplied,
            Err(err) => PeerOutcome::Failed(err),
        },
    };
    events.completed(outcome);
}

async fn create_local(
    connection: &dyn PeerConnection,
    offer: bool,
) -> Result<SessionDescription, PeerError> {
    let description = if offer {
        connection.create_offer().await?
    } else {
        connection.create_answer().await?
    };
    connection.set_local_description(description).await
}
