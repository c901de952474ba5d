use crate::core::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Refresh coordinator configuration
///
/// Durations are stored in milliseconds so a policy can be loaded from a
/// JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Non-forced refreshes within this window after a successful refresh
    /// are skipped.
    pub freshness_window_ms: u64,

    /// Deadline for one refresh cycle; `None` leaves timeouts to the
    /// network layer.
    pub timeout_ms: Option<u64>,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            freshness_window_ms: 5 * 60 * 1000, // 5 minutes
            timeout_ms: None,
        }
    }
}

impl RefreshPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the freshness window
    pub fn freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the refresh deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn freshness_window_duration(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Parse a policy document
    ///
    /// # Examples
    ///
    /// ```
    /// # use livesync::RefreshPolicy;
    /// let policy = RefreshPolicy::from_json(r#"{ "freshness_window_ms": 1000 }"#).unwrap();
    /// assert_eq!(policy.freshness_window_ms, 1000);
    /// assert_eq!(policy.timeout_ms, None);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Entity store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Enforce declared unique keys; a violation aborts the write batch.
    pub strict_unique: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { strict_unique: true }
    }
}

impl StoreConfig {
    pub fn strict_unique(mut self, strict: bool) -> Self {
        self.strict_unique = strict;
        self
    }
}
