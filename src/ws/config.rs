use std::time::Duration;

use bon::Builder;
use url::Url;

use super::backoff::ReconnectBackoff;

const DEFAULT_RECONNECT_MIN_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(15);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Configuration for a single activation of a [`ConnectionManager`](super::ConnectionManager).
///
/// `endpoint` and `enabled` form the identity of the configuration: re-activating with a
/// different identity tears the current connection down before a new one is opened. All other
/// fields are policy and can be changed on a live connection.
///
/// ```
/// use std::time::Duration;
///
/// use mes_realtime::ws::config::Config;
/// use url::Url;
///
/// let config = Config::builder()
///     .endpoint(Url::parse("wss://mes.example.com/ws/workorders").unwrap())
///     .heartbeat_interval(Duration::from_secs(10))
///     .build();
///
/// assert!(config.is_active());
/// assert!(config.auto_reconnect);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// WebSocket endpoint. `None` keeps the manager idle.
    pub endpoint: Option<Url>,
    /// When `false` the manager stays idle even if an endpoint is set.
    #[builder(default = true)]
    pub enabled: bool,
    /// Whether a connection closed by the peer or the network is reopened
    #[builder(default = true)]
    pub auto_reconnect: bool,
    /// Delay before the first reconnection attempt of an outage, raised to
    /// [`MIN_DELAY_FLOOR`](super::backoff::MIN_DELAY_FLOOR) if smaller
    #[builder(default = DEFAULT_RECONNECT_MIN_DELAY)]
    pub reconnect_min_delay: Duration,
    /// Upper bound of the exponential backoff curve, before jitter
    #[builder(default = DEFAULT_RECONNECT_MAX_DELAY)]
    pub reconnect_max_delay: Duration,
    /// Interval between keep-alive pings. [`Duration::ZERO`] disables the heartbeat.
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL)]
    pub heartbeat_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Whether this configuration should hold a connection open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.endpoint.is_some()
    }

    /// Returns `true` if `other` targets the same connection as `self`.
    #[must_use]
    pub fn same_identity(&self, other: &Config) -> bool {
        self.enabled == other.enabled && self.endpoint == other.endpoint
    }

    /// Heartbeat interval, or `None` when the heartbeat is disabled.
    #[must_use]
    pub fn heartbeat(&self) -> Option<Duration> {
        (!self.heartbeat_interval.is_zero()).then_some(self.heartbeat_interval)
    }
}

impl From<&Config> for ReconnectBackoff {
    fn from(config: &Config) -> Self {
        ReconnectBackoff::new(config.reconnect_min_delay, config.reconnect_max_delay)
    }
}
