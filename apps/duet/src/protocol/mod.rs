//! Signaling messages exchanged with the relay.
//!
//! The relay forwards frames between the two endpoints without looking inside
//! `sdp` / `ice` payloads, so their JSON shape follows what browsers emit for
//! `RTCSessionDescriptionInit` and `RTCIceCandidateInit`.

use serde::{Deserialize, Serialize};

pub mod wire;

pub use wire::{ProtocolError, decode_frame, decode_frames, encode_frame};

/// Role the relay assigns to this endpoint for a negotiation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegotiationRole {
    #[serde(rename = "offer")]
    Offerer,
    #[serde(rename = "answer")]
    Answerer,
}

impl NegotiationRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationRole::Offerer => "offer",
            NegotiationRole::Answerer => "answer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAnnouncement {
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// Identity announcement sent when the control channel opens.
    Open(OpenAnnouncement),
    /// Relay instruction to begin a negotiation round.
    Start(NegotiationRole),
    /// Session termination, from either side.
    Close,
    Ping,
    Pong,
    SessionDescription {
        sdp: SessionDescription,
        remote: Option<String>,
    },
    IceCandidate {
        candidate: IceCandidate,
        remote: Option<String>,
    },
}

impl SignalMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Open(_) => "open",
            SignalMessage::Start(_) => "start",
            SignalMessage::Close => "close",
            SignalMessage::Ping => "ping",
            SignalMessage::Pong => "pong",
            SignalMessage::SessionDescription { .. } => "sdp",
            SignalMessage::IceCandidate { .. } => "ice",
        }
    }
}
