use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub mod mock;
pub mod websocket;

pub use websocket::WebSocketConnector;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("relay connect failed: {0}")]
    Connect(String),
    #[error("channel closed")]
    ChannelClosed,
}

/// An established message-oriented connection to the relay.
///
/// `inbound` yields one text frame per message and ends when the transport
/// closes. Dropping `outbound` closes the connection from our side.
#[derive(Debug)]
pub struct RelayLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<RelayLink, TransportError>;
}
