//! Connector configuration

use crate::error::{ConnectorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Age beyond which a sibling record is considered stale and filtered
    /// from the public accessor
    pub stale_threshold: Duration,

    /// How often the local record is rewritten to keep it fresh
    pub heartbeat_interval: Duration,

    /// Flat delay before resubscribing a dropped substrate watch
    pub reconnect_interval: Duration,

    /// Cadence at which the reconciler drains submitted actions
    pub reconciler_quick_cycle: Duration,

    /// Cadence at which housekeeping (heartbeat, purge, leadership
    /// reconciliation) runs
    pub reconciler_long_cycle: Duration,

    /// How long shutdown waits for queued work to drain
    pub shutdown_grace: Duration,

    /// Siblings older than `stale_threshold * stale_purge_multiplier` are
    /// dropped from the internal map without waiting for a removal event.
    /// Must be at least 2.
    pub stale_purge_multiplier: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        let stale_threshold = Duration::from_secs(60);
        Self {
            stale_threshold,
            heartbeat_interval: stale_threshold / 3,
            reconnect_interval: Duration::from_millis(500),
            reconciler_quick_cycle: Duration::from_millis(25),
            reconciler_long_cycle: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            stale_purge_multiplier: 3,
        }
    }
}

impl ConnectorConfig {
    /// Create a configuration builder
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.stale_threshold.is_zero() {
            return Err(ConnectorError::InvalidConfig(
                "stale_threshold must be positive".into(),
            ));
        }
        if self.heartbeat_interval >= self.stale_threshold {
            return Err(ConnectorError::InvalidConfig(
                "heartbeat_interval must be shorter than stale_threshold".into(),
            ));
        }
        if self.reconciler_quick_cycle.is_zero() || self.reconciler_long_cycle.is_zero() {
            return Err(ConnectorError::InvalidConfig(
                "reconciler cycles must be positive".into(),
            ));
        }
        if self.reconciler_quick_cycle > self.reconciler_long_cycle {
            return Err(ConnectorError::InvalidConfig(
                "quick cycle must not exceed long cycle".into(),
            ));
        }
        if self.stale_purge_multiplier < 2 {
            return Err(ConnectorError::InvalidConfig(
                "stale_purge_multiplier must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// The age at which a sibling is dropped from the internal map
    pub fn purge_threshold(&self) -> Duration {
        self.stale_threshold * self.stale_purge_multiplier
    }
}

/// Builder for connector configuration.
///
/// `heartbeat_interval` defaults to one third of the configured stale
/// threshold when left unset.
#[derive(Debug, Default)]
pub struct ConnectorConfigBuilder {
    stale_threshold: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    reconnect_interval: Option<Duration>,
    reconciler_quick_cycle: Option<Duration>,
    reconciler_long_cycle: Option<Duration>,
    shutdown_grace: Option<Duration>,
    stale_purge_multiplier: Option<u32>,
}

impl ConnectorConfigBuilder {
    pub fn stale_threshold(mut self, value: Duration) -> Self {
        self.stale_threshold = Some(value);
        self
    }

    pub fn heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = Some(value);
        self
    }

    pub fn reconnect_interval(mut self, value: Duration) -> Self {
        self.reconnect_interval = Some(value);
        self
    }

    pub fn reconciler_quick_cycle(mut self, value: Duration) -> Self {
        self.reconciler_quick_cycle = Some(value);
        self
    }

    pub fn reconciler_long_cycle(mut self, value: Duration) -> Self {
        self.reconciler_long_cycle = Some(value);
        self
    }

    pub fn shutdown_grace(mut self, value: Duration) -> Self {
        self.shutdown_grace = Some(value);
        self
    }

    pub fn stale_purge_multiplier(mut self, value: u32) -> Self {
        self.stale_purge_multiplier = Some(value);
        self
    }

    pub fn build(self) -> ConnectorConfig {
        let defaults = ConnectorConfig::default();
        let stale_threshold = self.stale_threshold.unwrap_or(defaults.stale_threshold);
        ConnectorConfig {
            stale_threshold,
            heartbeat_interval: self.heartbeat_interval.unwrap_or(stale_threshold / 3),
            reconnect_interval: self.reconnect_interval.unwrap_or(defaults.reconnect_interval),
            reconciler_quick_cycle: self
                .reconciler_quick_cycle
                .unwrap_or(defaults.reconciler_quick_cycle),
            reconciler_long_cycle: self
                .reconciler_long_cycle
                .unwrap_or(defaults.reconciler_long_cycle),
            shutdown_grace: self.shutdown_grace.unwrap_or(defaults.shutdown_grace),
            stale_purge_multiplier: self
                .stale_purge_multiplier
                .unwrap_or(defaults.stale_purge_multiplier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_heartbeat_is_third_of_stale() {
        let config = ConnectorConfig::default();
        assert_eq!(config.heartbeat_interval * 3, config.stale_threshold);
        config.validate().unwrap();
    }

    #[test]
    fn test_builder_derives_heartbeat() {
        let config = ConnectorConfig::builder()
            .stale_threshold(Duration::from_secs(30))
            .build();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_slow_heartbeat() {
        let config = ConnectorConfig::builder()
            .stale_threshold(Duration::from_secs(10))
            .heartbeat_interval(Duration::from_secs(10))
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_low_multiplier() {
        let config = ConnectorConfig::builder().stale_purge_multiplier(1).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_purge_threshold() {
        let config = ConnectorConfig::builder()
            .stale_threshold(Duration::from_secs(10))
            .stale_purge_multiplier(3)
            .build();
        assert_eq!(config.purge_threshold(), Duration::from_secs(30));
    }
}
