//! Per-connection registration session.
//!
//! Each `/introduction/{peerId}` connection gets a Session. It registers the
//! peer, writes queued Connect messages to the socket and applies every Join
//! or Leave it reads. Malformed frames are dropped. A frame over the peer's
//! message quota closes the connection with a policy close: the client's key
//! set has already moved on, so it has to reconnect and send it in full.
//! Otherwise only a closed socket, a newer registration for the same peer,
//! or relay shutdown ends the session.

use crate::error::{ProtocolError, ProtocolResult};
use crate::registry::Registration;
use crate::server::{self, Relay};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use rendezvous_types::{ClientMessage, PeerId, WireError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;

/// A registration connection for one peer.
pub struct Session {
    relay: Arc<Relay>,
    peer: PeerId,
}

impl Session {
    /// Create a session for `peer` (the id from the request path).
    pub fn new(relay: Arc<Relay>, peer: PeerId) -> Self {
        Self { relay, peer }
    }

    /// Register the peer unless the relay is already stopping.
    fn open(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Registration> {
        if server::is_stopped(shutdown) {
            tracing::debug!("Relay stopping, refusing registration for {}", self.peer);
            return None;
        }
        Some(self.relay.introductions().register(&self.peer))
    }

    /// Run the session until the socket closes or the relay shuts down.
    pub async fn run(self, socket: WebSocket) {
        // Subscribe before registering so a concurrent shutdown is never missed
        let mut shutdown = self.relay.shutdown_signal();
        let Some(Registration {
            session,
            mut outbound,
        }) = self.open(&mut shutdown)
        else {
            let _ = socket.close().await;
            return;
        };
        let (mut ws_tx, mut ws_rx) = socket.split();
        let mut close_frame = None;

        loop {
            tokio::select! {
                queued = outbound.recv() => match queued {
                    Some(message) => match message.to_json() {
                        Ok(text) => {
                            if ws_tx.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to serialize {}: {}", message.message_type().as_str(), e);
                        }
                    },
                    None => {
                        tracing::debug!("Registration for {} replaced or cleared", self.peer);
                        break;
                    }
                },
                frame = ws_rx.next() => {
                    let result = match frame {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Binary(data))) => self.handle_binary(&data),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::debug!("Registration socket for {} failed: {}", self.peer, e);
                            break;
                        }
                    };
                    if let Some(frame) = self.on_frame(result) {
                        close_frame = Some(frame);
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        self.relay.introductions().unregister(&self.peer, session);
        if let Some(frame) = close_frame {
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
        }
        let _ = ws_tx.close().await;
    }

    /// Log and count the outcome of one frame. Returns the close frame to
    /// end the session with, if the frame cannot be tolerated.
    fn on_frame(&self, result: ProtocolResult<usize>) -> Option<CloseFrame<'static>> {
        match result {
            Ok(introduced) => {
                tracing::debug!("Frame from {} produced {} introductions", self.peer, introduced);
                None
            }
            Err(e @ ProtocolError::RateLimited { .. }) => {
                tracing::warn!("Closing registration for {}: {}", self.peer, e);
                Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "rate limited".into(),
                })
            }
            Err(e) => {
                self.relay
                    .metrics()
                    .malformed_messages_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping frame from {}: {}", self.peer, e);
                None
            }
        }
    }

    fn handle_binary(&self, data: &[u8]) -> ProtocolResult<usize> {
        let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NotText)?;
        self.handle_text(text)
    }

    /// Decode and apply one Join/Leave frame. Returns the number of
    /// introductions it produced.
    fn handle_text(&self, text: &str) -> ProtocolResult<usize> {
        let limit = self.relay.config().limits.max_message_size;
        if text.len() > limit {
            return Err(WireError::TooLarge {
                size: text.len(),
                limit,
            }
            .into());
        }

        let message = ClientMessage::from_json(text)?;

        if let Err(e) = self.relay.rate_limits().check_message(&self.peer) {
            self.relay
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            return Err(ProtocolError::RateLimited {
                reason: e.to_string(),
            });
        }

        if message.sender() != &self.peer {
            tracing::debug!(
                "{} from {} claims id {}, using the path id",
                message.message_type().as_str(),
                self.peer,
                message.sender()
            );
        }

        let introductions = match &message {
            ClientMessage::Join(join) => {
                self.relay
                    .introductions()
                    .apply_interest(&self.peer, &join.join, &[])
            }
            ClientMessage::Leave(leave) => {
                self.relay
                    .introductions()
                    .apply_interest(&self.peer, &[], &leave.leave)
            }
        };

        Ok(introductions.len())
    }
}
