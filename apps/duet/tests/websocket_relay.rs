use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use duet_client_core::control::ChannelState;
use duet_client_core::media::MockMedia;
use duet_client_core::peer::mock::MockPeerConnector;
use duet_client_core::transport::WebSocketConnector;
use duet_client_core::{ClientConfig, EndpointIdentity, SessionEvent, SignalingClient};

/// One accepted websocket as seen by the test: frames the client wrote, and a
/// sender for frames to push to it. Dropping `to_client` closes the socket.
struct RelayConn {
    from_client: mpsc::UnboundedReceiver<Value>,
    to_client: Option<mpsc::UnboundedSender<Value>>,
}

impl RelayConn {
    async fn next(&mut self) -> Result<Value> {
        timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .context("frame within timeout")?
            .context("client frame")
    }

    fn push(&self, value: Value) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(value);
        }
    }
}

#[derive(Clone)]
struct RelayState {
    accepted: mpsc::UnboundedSender<RelayConn>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    if state
        .accepted
        .send(RelayConn {
            from_client: in_rx,
            to_client: Some(out_tx),
        })
        .is_err()
    {
        return;
    }

    let send_task = tokio::spawn(async move {
        while let Some(value) = out_rx.recv().await {
            if sender.send(WsMessage::Text(value.to_string())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(WsMessage::Close(None)).await;
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            WsMessage::Text(text) => {
                if let Ok(value) = serde_json::from_str::<Value>(&text) {
                    let _ = in_tx.send(value);
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    send_task.abort();
}

async fn spawn_relay() -> Result<(String, mpsc::UnboundedReceiver<RelayConn>, oneshot::Sender<()>)> {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let router = Router::new()
        .route("/", get(ws_handler))
        .with_state(RelayState {
            accepted: accepted_tx,
        });
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("listener bind")?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });
    Ok((format!("ws://{addr}/"), accepted_rx, shutdown_tx))
}

async fn accept(accepted: &mut mpsc::UnboundedReceiver<RelayConn>) -> Result<RelayConn> {
    timeout(Duration::from_secs(5), accepted.recv())
        .await
        .context("connection within timeout")?
        .context("relay running")
}

#[test_timeout::tokio_timeout_test]
async fn websocket_client_announces_answers_and_reconnects() -> Result<()> {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let (url, mut accepted, shutdown) = spawn_relay().await?;
    let config = ClientConfig::default()
        .with_relay_url(&url)?
        .with_reconnect_delay(Duration::from_millis(200));
    let client = SignalingClient::new(
        config,
        EndpointIdentity::new("alice", "bob")?,
        WebSocketConnector::new(),
        MockPeerConnector::new(),
        MockMedia::with_tracks(["cam"]),
    );
    let mut reports = client.subscribe();
    let handle = client.spawn();

    let mut first = accept(&mut accepted).await?;
    assert_eq!(
        first.next().await?,
        json!({"open": {"local": "alice", "remote": "bob"}})
    );

    first.push(json!({"ping": 1}));
    assert_eq!(first.next().await?, json!({"pong": 1}));

    first.push(json!({"start": "offer"}));
    let offer = first.next().await?;
    assert_eq!(offer["sdp"]["type"], "offer");
    assert_eq!(offer["sdp"]["sdp"], "offer-1");
    assert_eq!(offer["remote"], "bob");

    // Relay drops the socket; the client comes back on its own.
    first.to_client = None;
    let mut second = accept(&mut accepted).await?;
    assert_eq!(
        second.next().await?,
        json!({"open": {"local": "alice", "remote": "bob"}})
    );

    let saw_closed = timeout(Duration::from_secs(5), async {
        loop {
            match reports.recv().await {
                Ok(SessionEvent::ChannelStateChanged(ChannelState::Closed)) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(saw_closed);

    let snapshot = handle.snapshot().await.context("client stopped")?;
    assert_eq!(snapshot.generation, 2);
    assert_eq!(snapshot.channel, ChannelState::Open);

    handle.shutdown().await;
    let _ = shutdown.send(());
    Ok(())
}
