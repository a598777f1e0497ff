//! Relay control channel: connect, identity handshake, heartbeat, reconnect.
//!
//! The manager never blocks. Connecting, reading and timers all run on
//! spawned tasks that post [`ControlEvent`]s tagged with the generation of the
//! channel they belong to; the owner feeds those events back through
//! [`ControlChannel::handle_event`], which discards anything from a channel
//! that has since been replaced.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::ClientConfig;
use crate::protocol::{SignalMessage, encode_frame};
use crate::session::EndpointIdentity;
use crate::transport::{RelayConnector, RelayLink, TransportError};

pub mod heartbeat;

use heartbeat::Heartbeat;

pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Outbound side of the control channel as seen by the session controller.
pub trait SignalSink {
    /// Returns false when the message was dropped because no channel is open.
    fn send_signal(&self, message: SignalMessage) -> bool;
}

#[derive(Debug)]
pub enum ControlEvent {
    Opened {
        generation: Generation,
        link: RelayLink,
    },
    ConnectFailed {
        generation: Generation,
        error: TransportError,
    },
    Frame {
        generation: Generation,
        text: String,
    },
    Closed {
        generation: Generation,
    },
    HeartbeatDue {
        generation: Generation,
    },
    ReconnectDue {
        generation: Generation,
    },
}

/// What the owner has to act on after an event was applied.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlNotice {
    Frame(String),
    State(ChannelState),
    ReconnectAbandoned { attempts: u32 },
}

struct Channel {
    generation: Generation,
    state: ChannelState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    heartbeat: Option<Heartbeat>,
    tasks: Vec<JoinHandle<()>>,
}

impl Channel {
    fn connecting(generation: Generation) -> Self {
        Self {
            generation,
            state: ChannelState::Connecting,
            outbound: None,
            heartbeat: None,
            tasks: Vec::new(),
        }
    }

    /// Releases the transport and every task bound to this channel.
    fn release(&mut self, state: ChannelState) {
        self.state = state;
        self.outbound = None;
        self.heartbeat = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

pub struct ControlChannel<C> {
    connector: Arc<C>,
    url: Url,
    identity: EndpointIdentity,
    reconnect_delay: Duration,
    heartbeat_interval: Duration,
    max_reconnect_attempts: Option<u32>,
    events: mpsc::UnboundedSender<ControlEvent>,
    generation: Generation,
    current: Option<Channel>,
    failed_attempts: u32,
    timers: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl<C: RelayConnector> ControlChannel<C> {
    pub fn new(
        connector: Arc<C>,
        config: &ClientConfig,
        identity: EndpointIdentity,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            connector,
            url: config.relay_url.clone(),
            identity,
            reconnect_delay: config.reconnect_delay,
            heartbeat_interval: config.heartbeat_interval,
            max_reconnect_attempts: config.max_reconnect_attempts,
            events,
            generation: 0,
            current: None,
            failed_attempts: 0,
            timers: Vec::new(),
            stopped: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.current
            .as_ref()
            .map_or(ChannelState::Closed, |channel| channel.state)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Opens a new channel, replacing the current one. Any reconnect already
    /// scheduled for the replaced channel becomes a no-op.
    pub fn connect(&mut self) {
        self.stopped = false;
        self.timers.retain(|timer| !timer.is_finished());
        if let Some(mut old) = self.current.take() {
            old.release(ChannelState::Closing);
            tracing::debug!(
                target = "signaling",
                generation = old.generation,
                state = %old.state,
                "replaced control channel"
            );
        }

        self.generation += 1;
        let generation = self.generation;
        let mut channel = Channel::connecting(generation);
        tracing::debug!(target = "signaling", generation, url = %self.url, "connecting to relay");

        let connector = self.connector.clone();
        let url = self.url.clone();
        let events = self.events.clone();
        channel.tasks.push(tokio::spawn(async move {
            let event = match connector.connect(&url).await {
                Ok(link) => ControlEvent::Opened { generation, link },
                Err(error) => ControlEvent::ConnectFailed { generation, error },
            };
            let _ = events.send(event);
        }));
        self.current = Some(channel);
    }

    /// Operator-initiated [`connect`](Self::connect): also restores the full
    /// reconnect budget, so a channel that gave up retries again.
    pub fn restart(&mut self) {
        self.failed_attempts = 0;
        self.connect();
    }

    /// Closes the current channel for good; nothing reconnects until the next
    /// [`connect`](Self::connect).
    pub fn shutdown(&mut self) {
        self.stopped = true;
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        if let Some(channel) = self.current.as_mut() {
            tracing::debug!(
                target = "signaling",
                generation = channel.generation,
                "closing control channel"
            );
            channel.release(ChannelState::Closed);
        }
    }

    /// Serializes and transmits `message` if the channel is open; otherwise the
    /// message is dropped.
    pub fn send(&self, message: &SignalMessage) -> bool {
        let Some(channel) = self.current.as_ref() else {
            tracing::debug!(target = "signaling", kind = message.kind(), "no control channel; dropping");
            return false;
        };
        let Some(outbound) = channel
            .outbound
            .as_ref()
            .filter(|_| channel.state == ChannelState::Open)
        else {
            tracing::debug!(
                target = "signaling",
                generation = channel.generation,
                state = %channel.state,
                kind = message.kind(),
                "control channel not open; dropping"
            );
            return false;
        };
        let text = match encode_frame(message) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(target = "signaling", kind = message.kind(), error = %err, "failed to encode frame");
                return false;
            }
        };
        tracing::trace!(target = "signaling", generation = channel.generation, kind = message.kind(), "send");
        outbound.send(text).is_ok()
    }

    pub fn handle_event(&mut self, event: ControlEvent) -> Option<ControlNotice> {
        match event {
            ControlEvent::Opened { generation, link } => self.on_opened(generation, link),
            ControlEvent::ConnectFailed { generation, error } => {
                if !self.is_current(generation) {
                    return None;
                }
                tracing::warn!(target = "signaling", generation, error = %error, "relay connect failed");
                self.failed_attempts = self.failed_attempts.saturating_add(1);
                self.on_closed(generation)
            }
            ControlEvent::Closed { generation } => {
                if !self.is_current(generation) {
                    return None;
                }
                tracing::info!(target = "signaling", generation, "control channel closed");
                self.on_closed(generation)
            }
            ControlEvent::Frame { generation, text } => {
                if self.is_current(generation) && self.state() == ChannelState::Open {
                    Some(ControlNotice::Frame(text))
                } else {
                    tracing::trace!(target = "signaling", generation, "dropping frame from stale channel");
                    None
                }
            }
            ControlEvent::HeartbeatDue { generation } => {
                if self.is_current(generation) && self.state() == ChannelState::Open {
                    self.send(&SignalMessage::Ping);
                }
                None
            }
            ControlEvent::ReconnectDue { generation } => {
                if generation != self.generation
                    || self.stopped
                    || self.state() != ChannelState::Closed
                {
                    tracing::debug!(
                        target = "signaling",
                        generation,
                        current = self.generation,
                        "stale reconnect ignored"
                    );
                    return None;
                }
                self.connect();
                Some(ControlNotice::State(ChannelState::Connecting))
            }
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.current
            .as_ref()
            .is_some_and(|channel| channel.generation == generation)
    }

    fn on_opened(&mut self, generation: Generation, link: RelayLink) -> Option<ControlNotice> {
        if !self.is_current(generation) || self.stopped {
            tracing::debug!(target = "signaling", generation, "discarding link for replaced channel");
            return None;
        }
        let RelayLink {
            outbound,
            mut inbound,
        } = link;

        let events = self.events.clone();
        let pump = tokio::spawn(async move {
            while let Some(text) = inbound.recv().await {
                if events.send(ControlEvent::Frame { generation, text }).is_err() {
                    return;
                }
            }
            let _ = events.send(ControlEvent::Closed { generation });
        });

        let events = self.events.clone();
        let heartbeat = Heartbeat::start(self.heartbeat_interval, move || {
            events.send(ControlEvent::HeartbeatDue { generation }).is_ok()
        });

        if let Some(channel) = self.current.as_mut() {
            channel.state = ChannelState::Open;
            channel.outbound = Some(outbound);
            channel.tasks.push(pump);
            channel.heartbeat = Some(heartbeat);
        }
        self.failed_attempts = 0;
        tracing::info!(target = "signaling", generation, "control channel open");
        self.send(&SignalMessage::Open(self.identity.announcement()));
        Some(ControlNotice::State(ChannelState::Open))
    }

    fn on_closed(&mut self, generation: Generation) -> Option<ControlNotice> {
        if let Some(channel) = self.current.as_mut() {
            channel.release(ChannelState::Closed);
        }
        if self.stopped {
            return Some(ControlNotice::State(ChannelState::Closed));
        }
        let failed = self.failed_attempts;
        if self.max_reconnect_attempts.is_some_and(|max| failed >= max) {
            tracing::warn!(
                target = "signaling",
                generation,
                attempts = self.failed_attempts,
                "giving up on relay"
            );
            return Some(ControlNotice::ReconnectAbandoned {
                attempts: self.failed_attempts,
            });
        }

        let delay = self.reconnect_delay;
        let events = self.events.clone();
        tracing::debug!(
            target = "signaling",
            generation,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        self.timers.retain(|timer| !timer.is_finished());
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ControlEvent::ReconnectDue { generation });
        }));
        Some(ControlNotice::State(ChannelState::Closed))
    }
}

impl<C: RelayConnector> SignalSink for ControlChannel<C> {
    fn send_signal(&self, message: SignalMessage) -> bool {
        self.send(&message)
    }
}

impl<C> Drop for ControlChannel<C> {
    fn drop(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        if let Some(channel) = self.current.as_mut() {
            channel.release(ChannelState::Closed);
        }
    }
}
