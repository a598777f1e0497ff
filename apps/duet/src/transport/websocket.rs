use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

use super::{RelayConnector, RelayLink, TransportError};

/// Relay connector over a plain WebSocket; each signaling frame is one text message.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<RelayLink, TransportError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(format!("websocket connect failed: {err}")))?;
        tracing::debug!(target = "signaling", url = %url, "relay websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                tracing::trace!(target = "signaling", event = "ws_out", len = text.len());
                if ws_write.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            // Owner dropped the link: close from our side.
            let _ = ws_write.send(Message::Close(None)).await;
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        tracing::trace!(
                            target = "signaling",
                            event = "ws_in",
                            kind = "text",
                            len = text.len()
                        );
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        tracing::trace!(
                            target = "signaling",
                            event = "ws_in",
                            kind = "binary",
                            len = data.len()
                        );
                        match String::from_utf8(data) {
                            Ok(text) => {
                                if inbound_tx.send(text).is_err() {
                                    break;
                                }
                            }
                            Err(_) => tracing::debug!(
                                target = "signaling",
                                "dropping non-utf8 binary frame"
                            ),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!(
                                    target = "signaling",
                                    "relay websocket closed: {err}"
                                );
                            }
                            _ => {
                                tracing::warn!(target = "signaling", "relay websocket error: {err}");
                            }
                        }
                        break;
                    }
                }
            }
        });

        Ok(RelayLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
