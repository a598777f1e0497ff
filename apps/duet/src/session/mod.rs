use std::fmt;

use crate::control::ChannelState;
use crate::peer::{NegotiationStep, PeerState, RoundId};

mod controller;
mod identity;

pub use controller::PeerSession;
pub use identity::{EndpointIdentity, IdentityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Operator-facing reports. Nothing here requires a response; the client keeps
/// running whatever happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ChannelStateChanged(ChannelState),
    SessionStateChanged(SessionState),
    PeerStateChanged {
        round: RoundId,
        state: PeerState,
    },
    /// A negotiation step failed. The round is left as is; the next `start`
    /// from the relay recovers.
    SignalingError {
        round: RoundId,
        operation: NegotiationStep,
        reason: String,
    },
    /// Local media could not be acquired for a new round.
    MediaUnavailable {
        reason: String,
    },
    /// The reconnect cap was reached; the channel stays closed until restarted.
    ReconnectAbandoned {
        attempts: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub round: Option<RoundId>,
    pub remote_description_set: bool,
    pub queued: usize,
}
