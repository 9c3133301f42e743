//! Reconnecting WebSocket transport: one logical connection, flat-delay
//! reconnect, at most one deferred retry for sends issued while disconnected.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ClientError;
use crate::messages::{InboundEvent, OutboundTurn};

/// What the connection task reports to its single consumer, in receipt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(InboundEvent),
    Close,
}

#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Wait between a close and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Wait before the single retry of a send issued while not open.
    pub send_retry_delay: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(800),
            send_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Outbound side of a transport as seen by the chat core.
pub trait TurnSink: Send + Sync {
    /// Deliver a turn. An `Err` means delivery failed synchronously and the
    /// caller should use another path for this turn.
    fn send(&self, turn: &OutboundTurn) -> Result<(), ClientError>;

    /// Stop reconnecting and close the active connection, if any.
    fn dispose(&self);
}

struct Shared {
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    disposed: AtomicBool,
    shutdown: Notify,
    options: TransportOptions,
}

impl Shared {
    fn writer(&self) -> Option<mpsc::UnboundedSender<Message>> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_writer(&self, writer: Option<mpsc::UnboundedSender<Message>>) {
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = writer;
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Handle to a reconnecting connection. Dropping it disposes the connection.
pub struct Transport {
    shared: Arc<Shared>,
}

fn validate_endpoint(endpoint: &str) -> Result<(), ClientError> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|_| ClientError::InvalidEndpoint(endpoint.to_string()))?;
    let scheme_ok = matches!(uri.scheme_str(), Some("ws") | Some("wss"));
    if !scheme_ok || uri.host().is_none() {
        return Err(ClientError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(())
}

impl Transport {
    /// Open a connection to `endpoint` (e.g. `ws://localhost:8080/ws`) with default delays.
    pub fn open(
        endpoint: &str,
    ) -> Result<(Transport, mpsc::UnboundedReceiver<TransportEvent>), ClientError> {
        Self::open_with(endpoint, TransportOptions::default())
    }

    /// Open a connection; must be called from within a tokio runtime.
    pub fn open_with(
        endpoint: &str,
        options: TransportOptions,
    ) -> Result<(Transport, mpsc::UnboundedReceiver<TransportEvent>), ClientError> {
        validate_endpoint(endpoint)?;
        let shared = Arc::new(Shared {
            writer: Mutex::new(None),
            disposed: AtomicBool::new(false),
            shutdown: Notify::new(),
            options,
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(endpoint.to_string(), shared.clone(), events_tx));
        Ok((Transport { shared }, events_rx))
    }

    /// True while a socket is established.
    pub fn is_open(&self) -> bool {
        self.shared
            .writer()
            .map(|w| !w.is_closed())
            .unwrap_or(false)
    }
}

impl TurnSink for Transport {
    fn send(&self, turn: &OutboundTurn) -> Result<(), ClientError> {
        if self.shared.is_disposed() {
            return Err(ClientError::Disposed);
        }
        let text = serde_json::to_string(turn)?;
        if let Some(writer) = self.shared.writer() {
            return writer
                .send(Message::Text(text))
                .map_err(|_| ClientError::ConnectionClosed);
        }

        tracing::debug!("socket not open; retrying send once");
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shared.options.send_retry_delay).await;
            let delivered = !shared.is_disposed()
                && shared
                    .writer()
                    .map(|w| w.send(Message::Text(text)).is_ok())
                    .unwrap_or(false);
            if !delivered {
                tracing::warn!("socket still not open after retry; dropping outbound turn");
            }
        });
        Ok(())
    }

    fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::SeqCst) {
            self.shared.shutdown.notify_one();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(
    endpoint: String,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        if shared.is_disposed() {
            break;
        }
        let connected = tokio::select! {
            result = tokio_tungstenite::connect_async(endpoint.as_str()) => result,
            _ = shared.shutdown.notified() => break,
        };
        match connected {
            Ok((ws, _)) => {
                tracing::info!(%endpoint, "streaming channel open");
                let (mut sink, mut stream) = ws.split();
                let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
                shared.set_writer(Some(writer_tx));
                let _ = events.send(TransportEvent::Open);

                loop {
                    tokio::select! {
                        _ = shared.shutdown.notified() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        outbound = writer_rx.recv() => {
                            let Some(message) = outbound else { break };
                            if let Err(e) = sink.send(message).await {
                                tracing::warn!(error = %e, "websocket write failed");
                                break;
                            }
                        }
                        inbound = stream.next() => match inbound {
                            Some(Ok(Message::Text(text))) => match InboundEvent::decode(&text) {
                                Ok(event) => {
                                    let _ = events.send(TransportEvent::Message(event));
                                }
                                Err(e) => {
                                    tracing::debug!(error = %e, frame = %text, "dropping undecodable frame");
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "websocket read failed");
                                break;
                            }
                        },
                    }
                }

                shared.set_writer(None);
                let _ = events.send(TransportEvent::Close);
            }
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "streaming channel connect failed");
                let _ = events.send(TransportEvent::Close);
            }
        }

        if shared.is_disposed() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(shared.options.reconnect_delay) => {}
            _ = shared.shutdown.notified() => break,
        }
        tracing::info!(%endpoint, "reconnecting streaming channel");
    }
    shared.set_writer(None);
}
