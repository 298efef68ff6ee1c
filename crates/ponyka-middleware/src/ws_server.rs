//! WebSocket push endpoint for browser dashboards.
//!
//! Every accepted connection is registered as a subscriber in the shared
//! [`SubscriberRegistry`] and receives each broadcast frame as one JSON text
//! message. The endpoint is push-only: inbound text from the browser is
//! ignored, a Close frame (or a dropped socket) ends the session and
//! deregisters the subscriber.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use ponyka_types::BridgeError;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info};

use crate::registry::SubscriberRegistry;

pub const DEFAULT_WS_PORT: u16 = 3005;

/// Serves the push endpoint on top of a [`SubscriberRegistry`].
#[derive(Clone)]
pub struct PushServer {
    registry: Arc<SubscriberRegistry>,
}

impl PushServer {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    /// Bind `addr` and serve until the task is dropped.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Connection`] if the listener cannot be bound.
    pub async fn run(self, addr: SocketAddr) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Connection(format!("ws bind error on {addr}: {e}")))?;
        info!(addr = %addr, "push endpoint listening");
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), BridgeError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| BridgeError::Connection(format!("ws handshake from {peer}: {e}")))?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (subscriber, mut frames) = self.registry.subscribe(Some(peer));
        info!(peer = %peer, subscriber = %subscriber.id(), "ws client connected");

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(peer = %peer, error = %e, "ws read error");
                            break;
                        }
                        // push-only endpoint
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        self.registry.remove(subscriber.id());
        info!(peer = %peer, subscriber = %subscriber.id(), "ws client disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ponyka_types::{DecodedState, OperationState, PushMessage};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn wait_for_subscribers(registry: &SubscriberRegistry, n: usize) {
        for _ in 0..200 {
            if registry.len() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} subscribers, have {}", registry.len());
    }

    #[tokio::test]
    async fn client_receives_broadcast_and_is_removed_on_close() {
        let registry = Arc::new(SubscriberRegistry::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(PushServer::new(Arc::clone(&registry)).serve(listener));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        wait_for_subscribers(&registry, 1).await;

        let message = PushMessage::new(
            "opstate-update",
            DecodedState::OperationState(OperationState {
                op_mode: 5,
                op_status: 1,
            }),
        );
        assert_eq!(registry.broadcast(&message), 1);

        let received = ws.next().await.unwrap().unwrap();
        let Message::Text(text) = received else {
            panic!("expected a text frame, got {received:?}");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["type"], "opstate-update");
        assert_eq!(json["data"]["op_mode"], 5);

        // inbound chatter is ignored
        ws.send(Message::Text("hello".into())).await.unwrap();

        ws.close(None).await.unwrap();
        wait_for_subscribers(&registry, 0).await;
    }
}
