//! Per-connection transport task.
//!
//! Each connection attempt runs in its own task and reports back to the manager through an event
//! channel. Events carry the generation of the transport that produced them so the manager can
//! discard anything emitted by a connection it has already abandoned.

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::error::WsError;

/// What a transport reports to the manager.
#[derive(Debug)]
pub(crate) enum EventKind {
    /// The handshake completed
    Opened,
    /// A text frame, or a binary frame holding UTF-8
    Frame(String),
    /// The connection failed. Always followed by [`EventKind::Closed`].
    Error(WsError),
    /// The connection is gone, whether it ever opened or not
    Closed,
}

#[derive(Debug)]
pub(crate) struct TransportEvent {
    pub(crate) generation: u64,
    pub(crate) kind: EventKind,
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close,
}

/// Handle to a running transport task. Dropping it closes the connection.
#[derive(Debug)]
pub(crate) struct Transport {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Transport {
    /// Start connecting to `endpoint` in the background.
    pub(crate) fn open(
        endpoint: Url,
        generation: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            run(endpoint, generation, events, outbound_rx).await;
        });

        Self { outbound }
    }

    /// Queue a text frame on the live connection. The frame is dropped if the task has exited.
    pub(crate) fn send(&self, text: String) {
        if self.outbound.send(Outbound::Text(text)).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Dropping outbound frame, connection task has exited");
        }
    }

    /// Best-effort close. The task sends a close frame if the handshake has completed, or
    /// abandons the handshake otherwise.
    pub(crate) fn close(self) {
        _ = self.outbound.send(Outbound::Close);
    }
}

#[cfg(test)]
impl Transport {
    /// A transport with no task behind it. The receiver sees everything sent through it.
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        (Self { outbound }, outbound_rx)
    }
}

async fn run(
    endpoint: Url,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let emit = |kind: EventKind| {
        _ = events.send(TransportEvent { generation, kind });
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(%endpoint, generation, "Opening WebSocket connection");

    let ws_stream = tokio::select! {
        result = connect_async(endpoint.as_str()) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%endpoint, generation, error = %e, "Unable to connect");
                emit(EventKind::Error(WsError::Connection(e)));
                emit(EventKind::Closed);
                return;
            }
        },
        () = close_requested(&mut outbound) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation, "Connection abandoned before handshake completed");
            return;
        }
    };

    emit(EventKind::Opened);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Received WebSocket text message");
                        emit(EventKind::Frame(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => emit(EventKind::Frame(text)),
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(error = %e, "Dropping non UTF-8 binary frame");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?frame, generation, "Server closed the connection");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &frame;
                        emit(EventKind::Closed);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Protocol level PING/PONG is answered by tungstenite.
                    }
                    Some(Err(e)) => {
                        emit(EventKind::Error(WsError::Connection(e)));
                        emit(EventKind::Closed);
                        break;
                    }
                    None => {
                        emit(EventKind::Closed);
                        break;
                    }
                }
            }

            command = outbound.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            emit(EventKind::Error(WsError::Connection(e)));
                            emit(EventKind::Closed);
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        // The manager has already moved on, nothing to report.
                        _ = write.close().await;
                        break;
                    }
                }
            }
        }
    }
}

/// Resolves once the manager asks for a close or drops the handle.
async fn close_requested(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close) | None => return,
            Some(Outbound::Text(_)) => {
                // Sends are only issued once the manager has seen the connection open.
            }
        }
    }
}
