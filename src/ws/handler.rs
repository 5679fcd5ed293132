//! Lifecycle callbacks and the cell through which the connection task reads them.

#![expect(
    clippy::module_name_repetitions,
    reason = "Handler types name their role in the connection lifecycle"
)]

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::error::WsError;
use super::message::InboundMessage;

/// Receives connection lifecycle events.
///
/// All methods are called from the connection task, in event order, and have no-op defaults.
/// Within one connection `on_open` precedes every `on_message`, and nothing is delivered after the
/// matching `on_close`.
pub trait EventHandler: Send + Sync + 'static {
    /// A frame was received. `raw` is the text exactly as it arrived.
    fn on_message(&self, message: &InboundMessage, raw: &str) {
        let _ = (message, raw);
    }

    /// The transport is open.
    fn on_open(&self) {}

    /// The transport closed, whether the peer, the network or a deactivation closed it. Called
    /// once per connection attempt, including attempts that never opened.
    fn on_close(&self) {}

    /// The transport reported an error. A close event follows.
    fn on_error(&self, error: &WsError) {
        let _ = error;
    }
}

/// Handler that ignores every event.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

type MessageFn = dyn Fn(&InboundMessage, &str) + Send + Sync;
type LifecycleFn = dyn Fn() + Send + Sync;
type ErrorFn = dyn Fn(&WsError) + Send + Sync;

/// Closure based [`EventHandler`], for callers that only care about a few events.
///
/// ```
/// use mes_realtime::ws::handler::Callbacks;
///
/// let callbacks = Callbacks::default()
///     .with_open(|| println!("live"))
///     .with_message(|message, _raw| println!("{}", message.kind));
/// ```
#[derive(Clone, Default)]
pub struct Callbacks {
    message: Option<Arc<MessageFn>>,
    open: Option<Arc<LifecycleFn>>,
    close: Option<Arc<LifecycleFn>>,
    error: Option<Arc<ErrorFn>>,
}

impl Callbacks {
    /// Called for every received frame.
    #[must_use]
    pub fn with_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&InboundMessage, &str) + Send + Sync + 'static,
    {
        self.message = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_open<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.open = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_close<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.close = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_error<F: Fn(&WsError) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_message", &self.message.is_some())
            .field("on_open", &self.open.is_some())
            .field("on_close", &self.close.is_some())
            .field("on_error", &self.error.is_some())
            .finish()
    }
}

impl EventHandler for Callbacks {
    fn on_message(&self, message: &InboundMessage, raw: &str) {
        if let Some(f) = &self.message {
            f(message, raw);
        }
    }

    fn on_open(&self) {
        if let Some(f) = &self.open {
            f();
        }
    }

    fn on_close(&self) {
        if let Some(f) = &self.close {
            f();
        }
    }

    fn on_error(&self, error: &WsError) {
        if let Some(f) = &self.error {
            f(error);
        }
    }
}

/// Shared slot holding the latest handler.
///
/// The connection task reads it on every dispatch, so replacing the handler takes effect on the
/// next event without reopening the transport.
#[derive(Clone)]
pub(crate) struct HandlerCell(Arc<RwLock<Arc<dyn EventHandler>>>);

impl HandlerCell {
    pub(crate) fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self(Arc::new(RwLock::new(handler)))
    }

    pub(crate) fn replace(&self, handler: Arc<dyn EventHandler>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub(crate) fn current(&self) -> Arc<dyn EventHandler> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }
}
