#![expect(
    clippy::module_name_repetitions,
    reason = "Manager types expose their domain in the name for clarity"
)]

use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_stream::stream;
use backoff::backoff::Backoff as _;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tokio_util::sync::CancellationToken;

use super::backoff::ReconnectBackoff;
use super::config::Config;
use super::error::WsError;
use super::handler::{EventHandler, HandlerCell, NoopHandler};
use super::message::{ControlFrame, InboundMessage};
use super::transport::{EventKind, Transport, TransportEvent};
use crate::Result;
use crate::error::Error;

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Connection status as seen by collaborators.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    /// No activation, or deactivated
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Connected, frames flow both ways
    Open,
    /// The last connection closed; a reconnect may be pending
    Closed,
    /// The last connection reported an error; a close follows
    Error,
}

impl Status {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

#[derive(Debug)]
enum Command {
    Activate {
        config: Config,
        manual_close: CancellationToken,
    },
    Send(String),
    Deactivate,
}

/// Owns one realtime connection: opening, dispatch, heartbeat and reconnection.
///
/// Every state transition happens on a single background task. The handle is cheap to clone; the
/// connection is torn down when the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use mes_realtime::ws::{Callbacks, Config, ConnectionManager};
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = ConnectionManager::new(
///     Callbacks::default().with_message(|message, _raw| println!("{}", message.kind)),
/// );
///
/// manager.activate(
///     Config::builder()
///         .endpoint(Url::parse("wss://mes.example.com/ws/dashboard")?)
///         .build(),
/// );
///
/// manager.send(&serde_json::json!({ "type": "subscribe", "data": "line-3" }))?;
/// manager.deactivate();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    /// Commands for the connection task
    commands: mpsc::UnboundedSender<Command>,
    /// Latest status published by the connection task
    status_rx: watch::Receiver<Status>,
    /// Consecutive reconnect attempts since the last successful open
    attempts: Arc<AtomicU32>,
    /// Broadcast sender for incoming messages
    broadcast_tx: broadcast::Sender<InboundMessage>,
    /// Callbacks read by the connection task at dispatch time
    handler: HandlerCell,
    /// Latched on deactivation, before the connection task hears about it
    manual_close: Mutex<CancellationToken>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        // Dropping `commands` afterwards stops the connection task.
        self.manual_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(NoopHandler)
    }
}

impl ConnectionManager {
    /// Create an idle manager and spawn its connection task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<H: EventHandler>(handler: H) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::Idle);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let attempts = Arc::new(AtomicU32::new(0));
        let handler = HandlerCell::new(Arc::new(handler));

        let driver = Driver::new(
            status_tx,
            Arc::clone(&attempts),
            events_tx,
            handler.clone(),
            broadcast_tx.clone(),
        );

        tokio::spawn(async move {
            driver.run(commands_rx, events_rx).await;
        });

        Self {
            inner: Arc::new(ManagerInner {
                commands,
                status_rx,
                attempts,
                broadcast_tx,
                handler,
                manual_close: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Apply a configuration.
    ///
    /// If the endpoint or the enabled flag changed, any existing connection and its timers are
    /// torn down before a new connection is opened. Otherwise only the reconnect and heartbeat
    /// policy is updated and the live connection is kept.
    pub fn activate(&self, config: Config) {
        let manual_close = {
            let mut slot = self
                .inner
                .manual_close
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if !config.is_active() {
                slot.cancel();
            } else if slot.is_cancelled() {
                *slot = CancellationToken::new();
            }

            slot.clone()
        };

        _ = self.inner.commands.send(Command::Activate {
            config,
            manual_close,
        });
    }

    /// Tear down the connection and stay idle. Idempotent.
    ///
    /// The manual-close latch is set before this returns, so a close racing with the
    /// deactivation can no longer schedule a reconnect.
    pub fn deactivate(&self) {
        self.inner
            .manual_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();

        _ = self.inner.commands.send(Command::Deactivate);
    }

    /// Send a payload if the connection is open; otherwise do nothing.
    ///
    /// Nothing is queued: a payload sent while the connection is not open is dropped, and so is
    /// one that races with a close. Callers that need delivery must watch [`Self::status`].
    ///
    /// # Errors
    ///
    /// Only if `payload` cannot be serialized to JSON.
    pub fn send<R: Serialize>(&self, payload: &R) -> Result<()> {
        if !self.status().is_open() {
            #[cfg(feature = "tracing")]
            tracing::trace!(status = %self.status(), "Dropping send while connection is not open");
            return Ok(());
        }

        let json = serde_json::to_string(payload)?;
        _ = self.inner.commands.send(Command::Send(json));
        Ok(())
    }

    /// Replace the lifecycle callbacks without reopening the connection.
    pub fn set_handler<H: EventHandler>(&self, handler: H) {
        self.inner.handler.replace(Arc::new(handler));
    }

    /// Get the current connection status.
    #[must_use]
    pub fn status(&self) -> Status {
        *self.inner.status_rx.borrow()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.inner.status_rx.clone()
    }

    /// Consecutive reconnect attempts scheduled since the last successful open.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Subscribe to incoming messages.
    ///
    /// Each call returns a new independent receiver. Messages are delivered at most once, in
    /// wire order, and only while the receiver exists.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Incoming messages as a stream. A slow consumer gets [`WsError::Lagged`] and then resumes
    /// with the oldest message still buffered.
    pub fn messages(&self) -> impl Stream<Item = Result<InboundMessage>> + use<> {
        let mut rx = self.subscribe();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => yield Ok(message),
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message stream lagged, missed {count} messages");
                        yield Err(Error::from(WsError::Lagged { count }));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Incoming messages of a single `type`.
    pub fn messages_of(&self, kind: &str) -> impl Stream<Item = Result<InboundMessage>> + use<> {
        let mut rx = self.subscribe();
        let kind = kind.to_owned();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(message) if message.is(&kind) => yield Ok(message),
                    Ok(_) => {}
                    Err(RecvError::Lagged(count)) => {
                        yield Err(Error::from(WsError::Lagged { count }));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

/// State owned by the connection task.
struct Driver {
    config: Config,
    /// Whether an active configuration is applied (status is not `Idle`)
    active: bool,
    status: Status,
    status_tx: watch::Sender<Status>,
    attempts: Arc<AtomicU32>,
    backoff: ReconnectBackoff,
    manual_close: CancellationToken,
    /// Generation of the current transport; events from older ones are stale
    generation: u64,
    transport: Option<Transport>,
    reconnect: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    handler: HandlerCell,
    broadcast_tx: broadcast::Sender<InboundMessage>,
}

impl Driver {
    fn new(
        status_tx: watch::Sender<Status>,
        attempts: Arc<AtomicU32>,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        handler: HandlerCell,
        broadcast_tx: broadcast::Sender<InboundMessage>,
    ) -> Self {
        let config = Config::default();

        Self {
            backoff: ReconnectBackoff::from(&config),
            config,
            active: false,
            status: Status::Idle,
            status_tx,
            attempts,
            manual_close: CancellationToken::new(),
            generation: 0,
            transport: None,
            reconnect: None,
            heartbeat: None,
            events_tx,
            handler,
            broadcast_tx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        self.manual_close.cancel();
                        self.teardown();
                        break;
                    }
                },

                Some(event) = events.recv() => self.handle_event(event),

                () = wait_reconnect(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.reconnect_now();
                }

                _ = tick_heartbeat(&mut self.heartbeat) => self.send_heartbeat(),
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection manager dropped, connection task exiting");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Activate {
                config,
                manual_close,
            } => self.activate(config, manual_close),
            Command::Send(text) => match &self.transport {
                Some(transport) if self.status.is_open() => {
                    transport.send(text);
                }
                _ => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(status = %self.status, "Dropping send, connection closed before it went out");
                }
            },
            Command::Deactivate => {
                self.manual_close.cancel();
                self.teardown();
                self.active = false;
                self.set_status(Status::Idle);
            }
        }
    }

    fn activate(&mut self, config: Config, manual_close: CancellationToken) {
        self.manual_close = manual_close;

        if self.active && self.config.same_identity(&config) {
            self.update_policy(config);
            return;
        }

        self.teardown();
        self.backoff = ReconnectBackoff::from(&config);
        self.attempts.store(0, Ordering::SeqCst);
        self.config = config;
        self.active = self.config.is_active();

        if self.active {
            self.connect();
        } else {
            self.set_status(Status::Idle);
        }
    }

    fn update_policy(&mut self, config: Config) {
        let heartbeat_changed = self.config.heartbeat_interval != config.heartbeat_interval;

        self.backoff
            .set_bounds(config.reconnect_min_delay, config.reconnect_max_delay);
        self.config = config;

        if heartbeat_changed && self.status.is_open() {
            self.start_heartbeat();
        }

        if !self.config.auto_reconnect {
            self.reconnect = None;
        } else if self.transport.is_none()
            && self.reconnect.is_none()
            && !self.manual_close.is_cancelled()
        {
            self.schedule_reconnect();
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        if event.generation != self.generation || self.transport.is_none() {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation = event.generation, kind = ?event.kind, "Ignoring event from a stale connection");
            return;
        }

        match event.kind {
            EventKind::Opened => {
                self.backoff.reset();
                self.attempts.store(0, Ordering::SeqCst);
                self.reconnect = None;
                self.start_heartbeat();
                self.set_status(Status::Open);

                #[cfg(feature = "tracing")]
                tracing::debug!(generation = self.generation, "WebSocket connection open");

                self.handler.current().on_open();
            }
            EventKind::Frame(text) => {
                if !self.status.is_open() {
                    return;
                }

                let message = InboundMessage::parse(&text);
                self.handler.current().on_message(&message, &text);
                _ = self.broadcast_tx.send(message);
            }
            EventKind::Error(error) => {
                self.set_status(Status::Error);
                self.handler.current().on_error(&error);
            }
            EventKind::Closed => {
                self.transport = None;
                self.heartbeat = None;
                self.set_status(Status::Closed);
                self.handler.current().on_close();

                if self.config.auto_reconnect && !self.manual_close.is_cancelled() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn connect(&mut self) {
        let Some(endpoint) = self.config.endpoint.clone() else {
            return;
        };

        self.generation = self.generation.wrapping_add(1);
        self.transport = Some(Transport::open(
            endpoint,
            self.generation,
            self.events_tx.clone(),
        ));
        self.set_status(Status::Connecting);
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.next_delay(&mut rand::rng());
        self.attempts.store(self.backoff.attempt(), Ordering::SeqCst);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            attempt = self.backoff.attempt(),
            ?delay,
            "Scheduling WebSocket reconnect"
        );

        // Replacing the slot drops, and thereby cancels, any pending timer.
        self.reconnect = Some(Box::pin(sleep(delay)));
    }

    fn reconnect_now(&mut self) {
        if !self.active || self.manual_close.is_cancelled() || self.transport.is_some() {
            return;
        }

        self.connect();
    }

    fn start_heartbeat(&mut self) {
        // A period too large to schedule is as good as no heartbeat.
        self.heartbeat = self.config.heartbeat().and_then(|period| {
            let start = Instant::now().checked_add(period)?;
            let mut heartbeat = interval_at(start, period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(heartbeat)
        });
    }

    fn send_heartbeat(&mut self) {
        // A tick can land right after a close was processed.
        let Some(transport) = self.transport.as_ref().filter(|_| self.status.is_open()) else {
            self.heartbeat = None;
            return;
        };

        match ControlFrame::ping(Utc::now()).encode() {
            Ok(ping) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Sending heartbeat");
                transport.send(ping);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Unable to encode heartbeat: {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Cancel both timers and close the live transport. On return no event of the previous
    /// connection will be dispatched.
    fn teardown(&mut self) {
        self.reconnect = None;
        self.heartbeat = None;
        self.generation = self.generation.wrapping_add(1);

        if let Some(transport) = self.transport.take() {
            transport.close();
            self.handler.current().on_close();
        }
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
        _ = self.status_tx.send(status);
    }
}

async fn wait_reconnect(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn tick_heartbeat(heartbeat: &mut Option<Interval>) -> Instant {
    match heartbeat {
        Some(heartbeat) => heartbeat.tick().await,
        None => pending().await,
    }
}
