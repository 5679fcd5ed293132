//! Realtime connection management.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns one WebSocket connection's lifecycle, including heartbeat and
//!   reconnection with exponential backoff
//! - [`EventHandler`]: lifecycle callbacks, replaceable on a live connection
//! - [`InboundMessage`]: typed frames, with a raw passthrough for anything else
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt as _;
//! use mes_realtime::ws::{Config, ConnectionManager, endpoint};
//!
//! # async fn example() -> mes_realtime::Result<()> {
//! let manager = ConnectionManager::default();
//! let url = endpoint::websocket_url("https://mes.example.com/api", "ws/dashboard", None)?;
//! manager.activate(Config::builder().endpoint(url).build());
//!
//! let mut messages = Box::pin(manager.messages());
//! while let Some(message) = messages.next().await {
//!     println!("{:?}", message?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod manager;
pub mod message;
mod transport;

pub use config::Config;
pub use handler::{Callbacks, EventHandler, NoopHandler};
pub use manager::{ConnectionManager, Status};
pub use message::InboundMessage;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
