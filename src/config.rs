//! Configuration for the embedded org and client connections
//!
//! Configuration is loaded from two sources with this precedence:
//! 1. **Environment variables** (highest priority) - `FORCESTREAM_*` prefix
//! 2. **Built-in defaults** (lowest priority)

use std::time::Duration;

/// Default number of events retained per channel for replay
pub const DEFAULT_RETENTION_CAPACITY: usize = 1024;

/// Default retention window for replayable events (24 hours, matching the
/// remote service's advertised durability window)
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default window within which changes to the same entity and operation are
/// coalesced into a single multi-record change event
pub const DEFAULT_CDC_COALESCE_WINDOW: Duration = Duration::from_millis(20);

/// Default buffer size for live delivery broadcast channels
pub const DEFAULT_DELIVERY_BUFFER: usize = 256;

/// Default API version advertised by connections
pub const DEFAULT_API_VERSION: &str = "54.0";

/// Default settle delay between subscription registration and the first
/// triggering mutation. The remote transport exposes no subscription-ready
/// acknowledgment, so callers wait this long before publishing.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Configuration for an [`EmbeddedOrg`](crate::service::EmbeddedOrg)
#[derive(Debug, Clone)]
pub struct OrgConfig {
    /// Maximum number of events retained per channel for replay
    pub retention_capacity: usize,
    /// Maximum age of a retained event before it is trimmed
    pub retention_window: Duration,
    /// Coalescing window for change data capture events.
    /// `Duration::ZERO` disables coalescing (one event per record).
    pub cdc_coalesce_window: Duration,
    /// Buffer size of the per-channel live delivery broadcast
    pub delivery_buffer: usize,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            retention_capacity: DEFAULT_RETENTION_CAPACITY,
            retention_window: DEFAULT_RETENTION_WINDOW,
            cdc_coalesce_window: DEFAULT_CDC_COALESCE_WINDOW,
            delivery_buffer: DEFAULT_DELIVERY_BUFFER,
        }
    }
}

impl OrgConfig {
    /// Build a config from defaults overridden by `FORCESTREAM_*` environment
    /// variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(capacity) = env_usize("FORCESTREAM_RETENTION_CAPACITY") {
            config.retention_capacity = capacity;
        }
        if let Some(ms) = env_u64("FORCESTREAM_RETENTION_WINDOW_MS") {
            config.retention_window = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("FORCESTREAM_CDC_COALESCE_MS") {
            config.cdc_coalesce_window = Duration::from_millis(ms);
        }
        if let Some(buffer) = env_usize("FORCESTREAM_DELIVERY_BUFFER") {
            config.delivery_buffer = buffer;
        }
        config
    }
}

/// Configuration for a [`Connection`](crate::connection::Connection)
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Instance URL, informational only in embedded mode
    pub instance_url: String,
    /// API version string stamped on provisioned fixtures
    pub api_version: String,
    /// Fixed delay used to let a subscription handshake settle before
    /// triggering events. A race-masking heuristic, not an ordering
    /// guarantee; prefer [`Subscription::ready`](crate::streaming::Subscription::ready)
    /// where possible.
    pub settle_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            instance_url: "https://embedded.localhost".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl ConnectionConfig {
    /// Build a config from defaults overridden by `FORCESTREAM_*` environment
    /// variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("FORCESTREAM_INSTANCE_URL") {
            config.instance_url = url;
        }
        if let Ok(version) = std::env::var("FORCESTREAM_API_VERSION") {
            config.api_version = version;
        }
        if let Some(ms) = env_u64("FORCESTREAM_SETTLE_MS") {
            config.settle_delay = Duration::from_millis(ms);
        }
        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
