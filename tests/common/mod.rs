#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use mes_realtime::ws::{Callbacks, InboundMessage};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
enum ServerCommand {
    Text(String),
    Close,
}

/// Mock WebSocket server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Commands for ALL connected clients
    commands: broadcast::Sender<ServerCommand>,
    /// Text frames received from any client
    frames_rx: mpsc::UnboundedReceiver<String>,
    /// One notification per client connection that ended
    disconnects_rx: mpsc::UnboundedReceiver<()>,
    /// Number of TCP connections accepted so far
    pub connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (commands, _) = broadcast::channel::<ServerCommand>(100);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<String>();
        let (disconnects_tx, disconnects_rx) = mpsc::unbounded_channel::<()>();
        let connections = Arc::new(AtomicUsize::new(0));

        let commands_tx = commands.clone();
        let connections_count = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                connections_count.fetch_add(1, Ordering::SeqCst);
                // Subscribe before the handshake so nothing sent after the client sees the
                // connection open is missed.
                let mut command_rx = commands_tx.subscribe();

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let frames_tx = frames_tx.clone();
                let disconnects_tx = disconnects_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        _ = frames_tx.send(text.to_string());
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(ServerCommand::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ServerCommand::Close) | Err(_) => {
                                        _ = write.send(Message::Close(None)).await;
                                        break;
                                    }
                                }
                            }
                        }
                    }

                    _ = disconnects_tx.send(());
                });
            }
        });

        Self {
            addr,
            commands,
            frames_rx,
            disconnects_rx,
            connections,
        }
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, message: &str) {
        _ = self.commands.send(ServerCommand::Text(message.to_owned()));
    }

    /// Close every connected client with a close frame.
    pub fn close_all(&self) {
        _ = self.commands.send(ServerCommand::Close);
    }

    /// Receive the next text frame sent by a client.
    pub async fn recv_frame(&mut self) -> Option<String> {
        timeout(Duration::from_secs(1), self.frames_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Discard every frame received so far.
    pub fn drain_frames(&mut self) {
        while self.frames_rx.try_recv().is_ok() {}
    }

    /// Wait until a client connection ends. Returns `false` on timeout.
    pub async fn wait_disconnect(&mut self) -> bool {
        timeout(Duration::from_secs(2), self.disconnects_rx.recv())
            .await
            .ok()
            .flatten()
            .is_some()
    }
}

/// Lifecycle events observed through the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open,
    Close,
    Error,
    Message(InboundMessage, String),
}

pub struct Events(mpsc::UnboundedReceiver<Event>);

impl Events {
    /// Next event, or `None` if nothing arrives within three seconds.
    pub async fn next_event(&mut self) -> Option<Event> {
        timeout(Duration::from_secs(3), self.0.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_next_event(&mut self) -> Option<Event> {
        self.0.try_recv().ok()
    }
}

/// Handler that forwards every callback into a channel.
pub fn recorder() -> (Callbacks, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (open, close, error, message) = (tx.clone(), tx.clone(), tx.clone(), tx);

    let callbacks = Callbacks::default()
        .with_open(move || {
            _ = open.send(Event::Open);
        })
        .with_close(move || {
            _ = close.send(Event::Close);
        })
        .with_error(move |_| {
            _ = error.send(Event::Error);
        })
        .with_message(move |m, raw| {
            _ = message.send(Event::Message(m.clone(), raw.to_owned()));
        });

    (callbacks, Events(rx))
}
