//! Registration connection driver.
//!
//! One task per client. It owns the `/introduction/{id}` WebSocket and
//! executes the actions produced by the shared [`RegistrationMachine`]:
//! connecting, sending Join/Leave, scheduling retries. Because the task runs
//! actions one at a time there is never more than one connection attempt in
//! flight.
//!
//! [`RegistrationMachine`]: rendezvous_core::RegistrationMachine

use crate::client::{ClientEvent, Shared};
use futures_util::{SinkExt, StreamExt};
use rendezvous_core::{Action, Event, RegistrationState};
use rendezvous_types::ServerMessage;
use std::collections::VecDeque;
use std::future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Run the registration loop until the machine reaches `Stopped`.
///
/// `requests` carries actions produced by the client's own calls into the
/// machine (`join`, `leave`, `close`). Dropping every sender stops the loop.
pub(crate) async fn run(shared: Arc<Shared>, requests: mpsc::UnboundedReceiver<Vec<Action>>) {
    Driver {
        shared,
        requests,
        socket: None,
        retry: None,
        pending: VecDeque::from([Action::Connect]),
    }
    .run()
    .await
}

struct Driver {
    shared: Arc<Shared>,
    requests: mpsc::UnboundedReceiver<Vec<Action>>,
    socket: Option<Ws>,
    retry: Option<Pin<Box<Sleep>>>,
    pending: VecDeque<Action>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            while let Some(action) = self.pending.pop_front() {
                if !self.execute(action).await {
                    self.disconnect().await;
                    tracing::debug!("Registration loop for {} stopped", self.shared.id);
                    return;
                }
            }

            tokio::select! {
                requested = self.requests.recv() => match requested {
                    Some(actions) => self.pending.extend(actions),
                    None => {
                        // Client dropped without close()
                        let actions = self.shared.apply(Event::StopRequested);
                        if actions.is_empty() {
                            self.disconnect().await;
                            return;
                        }
                        self.pending.extend(actions);
                    }
                },
                frame = next_frame(&mut self.socket) => self.on_frame(frame),
                _ = wait_retry(&mut self.retry) => {
                    self.retry = None;
                    let actions = self.shared.apply(Event::RetryTimerFired);
                    self.pending.extend(actions);
                }
            }
        }
    }

    /// Execute one action. Returns `false` once the machine has stopped.
    async fn execute(&mut self, action: Action) -> bool {
        match action {
            Action::Connect => self.connect().await,
            Action::Send(message) => {
                let Some(socket) = self.socket.as_mut() else {
                    tracing::debug!("Dropping {} while disconnected", message.message_type().as_str());
                    return true;
                };
                match message.to_json() {
                    Ok(text) => {
                        // A failed write surfaces as a read error on the next poll
                        if let Err(e) = socket.send(Message::Text(text)).await {
                            tracing::debug!("Registration write failed: {}", e);
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize registration message: {}", e),
                }
            }
            Action::ScheduleRetry { delay } => {
                tracing::info!("Registration for {} retrying in {:?}", self.shared.id, delay);
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Action::Disconnect => self.disconnect().await,
            Action::StateChanged(state) => {
                let stopped = state == RegistrationState::Stopped;
                self.shared.state.send_replace(state.clone());
                let _ = self.shared.events.send(ClientEvent::StateChanged(state));
                return !stopped;
            }
        }
        true
    }

    async fn connect(&mut self) {
        let url = self.shared.endpoint.introduction(&self.shared.id);
        tracing::debug!("Connecting to {}", url);

        let event = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                self.socket = Some(socket);
                tracing::info!("Registered with relay as {}", self.shared.id);
                Event::ConnectSucceeded
            }
            Err(e) => {
                tracing::warn!("Registration connect to {} failed: {}", url, e);
                Event::ConnectFailed {
                    error: e.to_string(),
                }
            }
        };

        let actions = self.shared.apply(event);
        self.pending.extend(actions);
    }

    async fn disconnect(&mut self) {
        self.retry = None;
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }

    fn on_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        let reason = match frame {
            Some(Ok(Message::Text(text))) => {
                self.on_server_text(&text);
                return;
            }
            Some(Ok(Message::Binary(data))) => {
                match std::str::from_utf8(&data) {
                    Ok(text) => self.on_server_text(text),
                    Err(_) => tracing::warn!("Ignoring non-UTF-8 registration frame"),
                }
                return;
            }
            Some(Ok(Message::Close(frame))) => match frame {
                Some(close) => format!("closed by relay: {}", close.reason),
                None => "closed by relay".to_string(),
            },
            Some(Ok(_)) => return,
            Some(Err(e)) => e.to_string(),
            None => "connection ended".to_string(),
        };

        tracing::info!("Registration connection lost: {}", reason);
        self.socket = None;
        let actions = self.shared.apply(Event::Disconnected { reason });
        self.pending.extend(actions);
    }

    fn on_server_text(&self, text: &str) {
        match ServerMessage::from_json(text) {
            Ok(ServerMessage::Connect(connect)) => {
                tracing::debug!("Introduced to {} on {:?}", connect.id, connect.keys);
                let Some(handle) = self.shared.peer_entry(&connect.id) else {
                    return;
                };
                for key in connect.keys {
                    handle.add(key);
                }
            }
            Err(e) => tracing::warn!("Ignoring relay frame: {}", e),
        }
    }
}

async fn next_frame(socket: &mut Option<Ws>) -> Option<Result<Message, tungstenite::Error>> {
    match socket.as_mut() {
        Some(socket) => socket.next().await,
        None => future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
