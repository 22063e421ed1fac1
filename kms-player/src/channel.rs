//! Session channel to the relay
//!
//! One persistent WebSocket per device, owned by a background task. The
//! task joins the performance on every successful connect, so a reconnect
//! always ends with a fresh snapshot. Sends are fire-and-forget: anything
//! queued while the link is down is discarded, never replayed.
//!
//! Reconnection is bounded. After `max_attempts` consecutive failures the
//! channel reports `Disconnected` and stops trying.

use futures::{SinkExt, StreamExt};
use kms_common::events::ConnectionState;
use kms_common::protocol::{ClientMessage, ServerMessage};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Per-attempt connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capped exponential backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): initial * 2^(attempt-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Output of the channel task
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged(ConnectionState),
    Message(ServerMessage),
}

/// Destination for outbound intents and heartbeats
pub trait ControlSink: Send {
    /// Fire-and-forget send
    fn send(&self, message: ClientMessage);
}

/// WebSocket URL of a performance on a relay
pub fn performance_url(relay_url: &str, session_id: &str) -> String {
    format!(
        "{}/performances/{}/ws",
        relay_url.trim_end_matches('/'),
        session_id
    )
}

/// Handle to the background connection task
pub struct SessionChannel {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl SessionChannel {
    /// Spawn the connection task for `url`
    ///
    /// Returns the handle and the stream of channel events.
    pub fn connect(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let url = url.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let task = tokio::spawn(async move {
            let mut link = Link {
                url,
                policy,
                outbound: outbound_rx,
                events: events_tx,
                state: state_tx,
            };
            link.run().await;
        });

        (
            Self {
                outbound: outbound_tx,
                state: state_rx,
                task,
            },
            events_rx,
        )
    }

    /// Request a fresh snapshot (joins are idempotent)
    pub fn join(&self) {
        self.send(ClientMessage::JoinPerformance);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Stop the connection task
    pub fn close(self) {
        self.task.abort();
    }
}

impl ControlSink for SessionChannel {
    fn send(&self, message: ClientMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Session channel closed, dropping outbound message");
        }
    }
}

/// How a connected session ended
enum SessionEnd {
    /// Owner dropped the channel
    Closed,
    /// Relay went away
    Lost,
}

/// State owned by the background task
struct Link {
    url: String,
    policy: ReconnectPolicy,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
}

impl Link {
    async fn run(&mut self) {
        let mut attempt: u32 = 0;
        self.set_state(ConnectionState::Connecting);

        loop {
            match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())).await {
                Ok(Ok((socket, _))) => {
                    attempt = 0;
                    let dropped = self.discard_queued();
                    if dropped > 0 {
                        warn!(dropped = dropped, "Discarded messages queued while disconnected");
                    }
                    info!(url = %self.url, "Connected to relay");
                    self.set_state(ConnectionState::Connected);

                    match self.serve(socket).await {
                        SessionEnd::Closed => return,
                        SessionEnd::Lost => warn!(url = %self.url, "Lost relay connection"),
                    }
                }
                Ok(Err(e)) => warn!(url = %self.url, error = %e, "Relay connection failed"),
                Err(_) => warn!(url = %self.url, "Relay connection timed out"),
            }

            if self.events.is_closed() {
                return;
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                warn!(
                    attempts = self.policy.max_attempts,
                    "Giving up on relay connection"
                );
                self.set_state(ConnectionState::Disconnected);
                return;
            }

            let delay = self.policy.delay_for(attempt);
            info!(
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to relay"
            );
            self.set_state(ConnectionState::Reconnecting { attempt });
            tokio::time::sleep(delay).await;
        }
    }

    /// Pump frames until either side goes away
    async fn serve(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();

        // Re-join on every connect so the device always starts from a snapshot
        if let Err(e) = send(&mut sink, &ClientMessage::JoinPerformance).await {
            warn!(error = %e, "Failed to send join");
            return SessionEnd::Lost;
        }

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            debug!(kind = message.kind(), "Relay frame");
                            if self.events.send(ChannelEvent::Message(message)).is_err() {
                                return SessionEnd::Closed;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed relay frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Relay socket error");
                        return SessionEnd::Lost;
                    }
                },
                outbound = self.outbound.recv() => match outbound {
                    Some(message) => {
                        if let Err(e) = send(&mut sink, &message).await {
                            // Fire-and-forget: the message is not retried
                            warn!(error = %e, "Send failed");
                            return SessionEnd::Lost;
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        return SessionEnd::Closed;
                    }
                },
            }
        }
    }

    fn discard_queued(&mut self) -> usize {
        let mut dropped = 0;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
        let _ = self.events.send(ChannelEvent::StateChanged(state));
    }
}

async fn send<S>(sink: &mut S, message: &ClientMessage) -> Result<(), String>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = message.to_json().map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}
