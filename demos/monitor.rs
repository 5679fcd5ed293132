//! Live connection monitor for the dashboard realtime endpoint.
//!
//! Connects, logs every status change and inbound message, and sends a `subscribe` request each
//! time the connection opens. Stops after Ctrl-C or once 100 messages have been received.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=debug cargo run --example monitor --features tracing -- http://localhost:8000 s3cr3t
//! ```

use futures::StreamExt as _;
use mes_realtime::ws::endpoint::websocket_url;
use mes_realtime::ws::{Callbacks, Config, ConnectionManager, Status};
use secrecy::SecretString;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let base = args.next().unwrap_or_else(|| "http://localhost:8000".to_owned());
    let token = args.next().map(SecretString::from);

    let endpoint = websocket_url(&base, "ws/dashboard", token.as_ref())?;
    info!(%base, "Connecting to dashboard stream");

    let manager = ConnectionManager::new(
        Callbacks::default()
            .with_open(|| info!("open"))
            .with_close(|| info!("closed"))
            .with_error(|error| warn!(%error, "transport error")),
    );
    manager.activate(Config::builder().endpoint(endpoint).build());

    let mut status = manager.status_receiver();
    let subscriber = manager.clone();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!(status = %current, attempts = subscriber.attempt_count());

            if current == Status::Open
                && let Err(e) = subscriber.send(&json!({ "type": "subscribe", "data": "dashboard" }))
            {
                warn!(error = %e, "Unable to subscribe");
            }
        }
    });

    let mut messages = Box::pin(manager.messages().take(100));
    loop {
        tokio::select! {
            message = messages.next() => match message {
                Some(Ok(message)) => info!(kind = %message.kind, data = ?message.data, "message"),
                Some(Err(e)) => warn!(error = %e, "stream error"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.deactivate();
    Ok(())
}
