use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use super::{RelayConnector, RelayLink, TransportError};
use crate::protocol::{SignalMessage, decode_frame, encode_frame};

struct RelayState {
    reachable: bool,
    attempts: usize,
    accepted: mpsc::UnboundedSender<RelaySession>,
}

/// In-process stand-in for the relay. Hand the connector to the client and
/// keep the `MockRelay` to accept and drive each connection.
pub struct MockRelay {
    state: Arc<Mutex<RelayState>>,
    accepted: mpsc::UnboundedReceiver<RelaySession>,
}

#[derive(Clone)]
pub struct MockRelayConnector {
    state: Arc<Mutex<RelayState>>,
}

impl MockRelay {
    pub fn new() -> (MockRelayConnector, MockRelay) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(RelayState {
            reachable: true,
            attempts: 0,
            accepted: tx,
        }));
        (
            MockRelayConnector {
                state: state.clone(),
            },
            MockRelay {
                state,
                accepted: rx,
            },
        )
    }

    /// Unreachable relays refuse every connect attempt.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Connect attempts seen so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    pub async fn accept(&mut self) -> Option<RelaySession> {
        self.accepted.recv().await
    }

    pub fn try_accept(&mut self) -> Option<RelaySession> {
        self.accepted.try_recv().ok()
    }
}

#[async_trait]
impl RelayConnector for MockRelayConnector {
    async fn connect(&self, _url: &Url) -> Result<RelayLink, TransportError> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if !state.reachable {
            return Err(TransportError::Connect("connection refused".into()));
        }
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let session = RelaySession {
            to_client: Some(to_client),
            from_client,
        };
        state
            .accepted
            .send(session)
            .map_err(|_| TransportError::ChannelClosed)?;
        Ok(RelayLink { outbound, inbound })
    }
}

/// The relay's end of one control channel.
pub struct RelaySession {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl RelaySession {
    pub fn send_text(&self, text: &str) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(text.to_string()).is_ok())
    }

    pub fn send(&self, message: &SignalMessage) -> bool {
        match encode_frame(message) {
            Ok(text) => self.send_text(&text),
            Err(_) => false,
        }
    }

    /// Next raw frame from the client; `None` once the client dropped the channel.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub async fn recv(&mut self) -> Option<SignalMessage> {
        let text = self.from_client.recv().await?;
        decode_frame(&text).ok()
    }

    /// Every frame already written by the client, decoded.
    pub fn drain(&mut self) -> Vec<SignalMessage> {
        let mut messages = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            if let Ok(message) = decode_frame(&text) {
                messages.push(message);
            }
        }
        messages
    }

    /// True once the client has released its end of the channel. Discards
    /// frames still pending.
    pub fn client_gone(&mut self) -> bool {
        loop {
            match self.from_client.try_recv() {
                Ok(_) => continue,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
                Err(mpsc::error::TryRecvError::Empty) => return false,
            }
        }
    }

    /// Simulates the transport dropping.
    pub fn close(&mut self) {
        self.to_client = None;
    }
}
