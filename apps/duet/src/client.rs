//! The signaling client: one task that owns the control channel and the peer
//! session and applies every event to them in arrival order.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::control::{ChannelState, ControlChannel, ControlEvent, ControlNotice, Generation};
use crate::media::MediaBinding;
use crate::peer::{PeerConnector, PeerEvent, RoundId};
use crate::protocol::decode_frames;
use crate::session::{EndpointIdentity, PeerSession, SessionEvent, SessionSnapshot};
use crate::transport::RelayConnector;

const REPORT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub channel: ChannelState,
    pub generation: Generation,
    pub session: SessionSnapshot,
}

enum Command {
    Restart,
    Hangup,
    Snapshot(oneshot::Sender<ClientSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

pub struct SignalingClient<C, P, M> {
    config: ClientConfig,
    identity: EndpointIdentity,
    relay: C,
    peers: P,
    media: M,
    reports: broadcast::Sender<SessionEvent>,
}

impl<C, P, M> SignalingClient<C, P, M>
where
    C: RelayConnector,
    P: PeerConnector,
    M: MediaBinding<P::LocalTrack, P::RemoteTrack>,
{
    pub fn new(config: ClientConfig, identity: EndpointIdentity, relay: C, peers: P, media: M) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            config,
            identity,
            relay,
            peers,
            media,
            reports,
        }
    }

    /// Subscribe before [`spawn`](Self::spawn) to see the very first reports.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.reports.subscribe()
    }

    /// Starts the event loop and connects to the relay.
    pub fn spawn(self) -> SignalingHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let control = ControlChannel::new(
            Arc::new(self.relay),
            &self.config,
            self.identity.clone(),
            control_tx,
        );
        let session = PeerSession::new(
            self.identity,
            Arc::new(self.peers),
            Arc::new(self.media),
            self.config.receive_only_fallback,
            peer_tx,
            self.reports.clone(),
        );
        let event_loop = EventLoop {
            control,
            session,
            reports: self.reports.clone(),
        };
        let task = tokio::spawn(event_loop.run(control_rx, peer_rx, commands_rx));
        SignalingHandle {
            commands: commands_tx,
            reports: self.reports,
            task,
        }
    }
}

/// Held by the embedding application. Dropping every handle shuts the client
/// down.
pub struct SignalingHandle {
    commands: mpsc::UnboundedSender<Command>,
    reports: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl SignalingHandle {
    /// Replaces the control channel with a fresh connection right away, with
    /// the full reconnect budget. Any pending reconnect for the old channel is
    /// ignored.
    pub fn restart(&self) -> bool {
        self.commands.send(Command::Restart).is_ok()
    }

    /// Tells the remote the session is over and drops the peer connection.
    pub fn hangup(&self) -> bool {
        self.commands.send(Command::Hangup).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.reports.subscribe()
    }

    /// `None` once the client has stopped.
    pub async fn snapshot(&self) -> Option<ClientSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Closes the peer connection and the control channel, then waits for the
    /// event loop to exit.
    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Err(err) = self.task.await {
            tracing::warn!(target = "signaling", error = %err, "signaling task ended abnormally");
        }
    }
}

struct EventLoop<C, P: PeerConnector, M> {
    control: ControlChannel<C>,
    session: PeerSession<P, M>,
    reports: broadcast::Sender<SessionEvent>,
}

impl<C, P, M> EventLoop<C, P, M>
where
    C: RelayConnector,
    P: PeerConnector,
    M: MediaBinding<P::LocalTrack, P::RemoteTrack>,
{
    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
        mut peer_rx: mpsc::UnboundedReceiver<(RoundId, PeerEvent<P::RemoteTrack>)>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        self.connect();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Restart) => {
                        self.control.restart();
                        self.report(SessionEvent::ChannelStateChanged(ChannelState::Connecting));
                    }
                    Some(Command::Hangup) => self.session.hangup(&self.control),
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::Shutdown(done)) => {
                        self.stop();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        tracing::debug!(target = "signaling", "all handles dropped");
                        self.stop();
                        break;
                    }
                },
                Some(event) = control_rx.recv() => {
                    if let Some(notice) = self.control.handle_event(event) {
                        self.on_notice(notice);
                    }
                }
                Some((round, event)) = peer_rx.recv() => {
                    self.session.handle_peer_event(round, event, &self.control);
                }
            }
        }
    }

    fn connect(&mut self) {
        self.control.connect();
        self.report(SessionEvent::ChannelStateChanged(ChannelState::Connecting));
    }

    fn stop(&mut self) {
        self.session.teardown();
        self.control.shutdown();
        self.report(SessionEvent::ChannelStateChanged(ChannelState::Closed));
    }

    fn on_notice(&mut self, notice: ControlNotice) {
        match notice {
            ControlNotice::Frame(text) => match decode_frames(&text) {
                Ok(messages) => {
                    for message in messages {
                        tracing::trace!(target = "signaling", kind = message.kind(), "inbound");
                        self.session.handle_inbound(message, &self.control);
                    }
                }
                Err(err) => {
                    tracing::debug!(target = "signaling", error = %err, "dropping malformed frame");
                }
            },
            ControlNotice::State(state) => {
                self.report(SessionEvent::ChannelStateChanged(state));
            }
            ControlNotice::ReconnectAbandoned { attempts } => {
                self.report(SessionEvent::ChannelStateChanged(ChannelState::Closed));
                self.report(SessionEvent::ReconnectAbandoned { attempts });
            }
        }
    }

    fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            channel: self.control.state(),
            generation: self.control.generation(),
            session: self.session.snapshot(),
        }
    }

    fn report(&self, event: SessionEvent) {
        let _ = self.reports.send(event);
    }
}
