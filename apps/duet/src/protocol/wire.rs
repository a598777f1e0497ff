use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{IceCandidate, NegotiationRole, OpenAnnouncement, SessionDescription, SignalMessage};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown negotiation role {0}")]
    UnknownRole(String),
    #[error("invalid {field} payload: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("frame carries no signaling key")]
    Empty,
}

/// One control-channel frame. Exactly one key is set on frames we produce;
/// inbound frames are matched by key presence in `decode_frame` order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    open: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    close: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ping: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pong: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote: Option<Value>,
}

pub fn encode_frame(message: &SignalMessage) -> Result<String, ProtocolError> {
    let mut frame = Frame::default();
    match message {
        SignalMessage::Open(announcement) => {
            frame.open = Some(serde_json::to_value(announcement)?);
        }
        SignalMessage::Start(role) => frame.start = Some(Value::from(role.as_str())),
        SignalMessage::Close => frame.close = Some(Value::Bool(true)),
        SignalMessage::Ping => frame.ping = Some(Value::from(1)),
        SignalMessage::Pong => frame.pong = Some(Value::from(1)),
        SignalMessage::SessionDescription { sdp, remote } => {
            frame.sdp = Some(serde_json::to_value(sdp)?);
            frame.remote = remote.clone().map(Value::String);
        }
        SignalMessage::IceCandidate { candidate, remote } => {
            frame.ice = Some(serde_json::to_value(candidate)?);
            frame.remote = remote.clone().map(Value::String);
        }
    }
    Ok(serde_json::to_string(&frame)?)
}

/// Decodes an inbound frame into the first message it carries. When several
/// keys are present the first of start, close, ping, pong, sdp, ice, open wins.
pub fn decode_frame(text: &str) -> Result<SignalMessage, ProtocolError> {
    decode_frames(text)?
        .into_iter()
        .next()
        .ok_or(ProtocolError::Empty)
}

/// Decodes an inbound frame into every message it carries, in dispatch order.
///
/// `start`, `close`, `ping` and `pong` stand alone. A frame with both `sdp` and
/// `ice` yields the description followed by the candidate; `open` is only
/// considered when neither is present.
pub fn decode_frames(text: &str) -> Result<Vec<SignalMessage>, ProtocolError> {
    let frame: Frame = serde_json::from_str(text)?;
    let remote = frame
        .remote
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(start) = frame.start.filter(is_truthy) {
        let role = match start.as_str() {
            Some("offer") => NegotiationRole::Offerer,
            Some("answer") => NegotiationRole::Answerer,
            _ => return Err(ProtocolError::UnknownRole(start.to_string())),
        };
        return Ok(vec![SignalMessage::Start(role)]);
    }
    if frame.close.as_ref().is_some_and(is_truthy) {
        return Ok(vec![SignalMessage::Close]);
    }
    if frame.ping.as_ref().is_some_and(is_truthy) {
        return Ok(vec![SignalMessage::Ping]);
    }
    if frame.pong.as_ref().is_some_and(is_truthy) {
        return Ok(vec![SignalMessage::Pong]);
    }

    let mut messages = Vec::new();
    if let Some(sdp) = frame.sdp {
        let sdp: SessionDescription = field("sdp", sdp)?;
        messages.push(SignalMessage::SessionDescription {
            sdp,
            remote: remote.clone(),
        });
    }
    if let Some(ice) = frame.ice {
        let candidate: IceCandidate = field("ice", ice)?;
        messages.push(SignalMessage::IceCandidate { candidate, remote });
    }
    if !messages.is_empty() {
        return Ok(messages);
    }
    if let Some(open) = frame.open {
        let announcement: OpenAnnouncement = field("open", open)?;
        return Ok(vec![SignalMessage::Open(announcement)]);
    }
    Err(ProtocolError::Empty)
}

fn field<T: serde::de::DeserializeOwned>(
    field: &'static str,
    value: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|err| ProtocolError::InvalidField {
        field,
        reason: err.to_string(),
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
