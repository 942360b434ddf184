//! Realtime client configuration

use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Configuration for both realtime channels
///
/// Endpoints are resolved once at construction time; there is no dynamic
/// reconfiguration mid-session. The stream client and the order tracker
/// each take their own copy, so their reconnection state never mixes.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// API base URL (e.g. "https://shop.dailycup.example")
    pub base_url: String,
    /// Order tracking socket URL (e.g. "wss://shop.dailycup.example/ws/orders")
    pub ws_url: String,
    /// Delay before the first reconnect attempt (doubles per attempt)
    pub reconnect_delay: Duration,
    /// Upper bound for the backoff schedule
    pub max_reconnect_delay: Duration,
    /// Reconnect attempts before giving up for good
    pub max_reconnect_attempts: u32,
    /// Tear down a connection that delivered nothing for this long
    /// (zero disables the check)
    pub idle_timeout: Duration,
    /// Tracker liveness probe interval (zero disables)
    pub heartbeat_interval: Duration,
}

impl Default for RealtimeConfig {
    /// Storefront defaults
    ///
    /// Matched to the server's keep-alive cadence: the stream pings every
    /// ~30 seconds, so a 45 second idle window tolerates one lost ping.
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            ws_url: "ws://localhost:8080/ws/orders".to_string(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            idle_timeout: Duration::from_secs(45),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl RealtimeConfig {
    /// Create a configuration for the given endpoints
    pub fn new(base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    /// Customer storefront profile (default)
    pub fn storefront(base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self::new(base_url, ws_url)
    }

    /// Courier app profile
    ///
    /// Couriers drive through patchy coverage, so probe more often and
    /// give up later.
    pub fn courier(base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            max_reconnect_attempts: 10,
            idle_timeout: Duration::from_secs(20),
            heartbeat_interval: Duration::from_secs(10),
            ..Self::new(base_url, ws_url)
        }
    }

    /// Set the base reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the backoff upper bound
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Set the reconnect attempt cap
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the inactivity window (zero disables)
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the tracker heartbeat interval (zero disables)
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Resolve the push stream URL for an auth token
    ///
    /// The SSE transport cannot carry custom headers, so the token
    /// travels as a query parameter.
    pub fn stream_url(&self, token: &str) -> ClientResult<String> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("Invalid base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Config("Base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "notifications", "stream"]);
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.into())
    }
}
