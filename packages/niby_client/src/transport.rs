//! WebSocket transport task.
//!
//! Each connection attempt runs in its own tokio task that owns the socket,
//! and talks to the session only through [`TransportEvent`]s. Events carry the
//! attempt's generation so the session can discard anything from a
//! connection it has already given up on.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;

#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// Handshake complete; text frames written to `outbound` go to the peer.
    Opened {
        generation: u64,
        outbound: mpsc::UnboundedSender<String>,
    },
    /// One inbound text frame.
    Frame { generation: u64, payload: String },
    /// The connection is gone (or never came up).
    Closed {
        generation: u64,
        error: TransportError,
    },
}

/// Spawn a connection attempt to `url`.
///
/// Cancelling `cancel` tears the socket down without emitting `Closed`: the
/// session already knows it asked for the shutdown.
pub(crate) fn spawn_connection(
    url: String,
    generation: u64,
    connect_timeout: Option<Duration>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = run_connection(&url, generation, connect_timeout, &events, &cancel) => result,
        };

        if cancel.is_cancelled() {
            return;
        }

        let error = match result {
            Ok(()) => TransportError::ClosedByPeer,
            Err(e) => e,
        };
        let _ = events.send(TransportEvent::Closed { generation, error });
    });
}

async fn run_connection(
    url: &str,
    generation: u64,
    connect_timeout: Option<Duration>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    debug!(url = %url, generation, "opening websocket");

    let handshake = tokio_tungstenite::connect_async(url);
    let connected = match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| TransportError::HandshakeTimeout(limit))?,
        None => handshake.await,
    };
    let (ws_stream, _response) = connected.map_err(TransportError::from_handshake)?;

    info!(url = %url, generation, "websocket open");

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    if events
        .send(TransportEvent::Opened {
            generation,
            outbound: outbound_tx,
        })
        .is_err()
    {
        // Session is gone.
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Fire-and-forget close; nobody waits for the ack.
                let _ = ws_write.send(Message::Close(None)).await;
                return Ok(());
            }
            frame = outbound_rx.recv() => {
                let Some(text) = frame else {
                    let _ = ws_write.send(Message::Close(None)).await;
                    return Ok(());
                };
                ws_write
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(TransportError::Write)?;
            }
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let payload = text.as_str().to_owned();
                        if events.send(TransportEvent::Frame { generation, payload }).is_err() {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(generation, bytes = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(generation, frame = ?frame, "peer closed websocket");
                        return Err(TransportError::ClosedByPeer);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let error = TransportError::from_read(e);
                        warn!(generation, error = %error, "websocket read failed");
                        return Err(error);
                    }
                    None => return Err(TransportError::ClosedByPeer),
                }
            }
        }
    }
}
