//! # Connection Configuration
//!
//! Per-meter settings for a physical connection. All durations are stored in
//! milliseconds so the struct can be embedded in a host's own config file:
//!
//! ```json
//! { "unit_id": 1, "poll_interval_ms": 10000, "family": "gems3512" }
//! ```
//!
//! Missing keys fall back to the defaults below.
//!
//! | Setting | Default |
//! |---------|---------|
//! | `unit_id` | 1 |
//! | `poll_interval_ms` | 2000 |
//! | `reconnect_backoff_ms` | 60000 |
//! | `connect_timeout_ms` | 5000 |
//! | `request_timeout_ms` | 5000 |
//! | `packet_logging` | off |
//! | `family` | `gems35xx` |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECONNECT_BACKOFF_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_UNIT_ID,
};
use crate::error::{ModbusError, ModbusResult};
use crate::models::MeterFamily;
use crate::protocol::SlaveId;

/// Settings for one physical meter connection.
///
/// # Example
///
/// ```rust
/// use voltage_poller::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::new()
///     .with_poll_interval_ms(10_000)
///     .with_reconnect_backoff_ms(5_000);
///
/// assert_eq!(config.poll_interval(), Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Modbus unit id used for every transaction.
    pub unit_id: SlaveId,
    /// Interval between poll cycles (milliseconds).
    pub poll_interval_ms: u64,
    /// Delay before reconnecting after the link drops (milliseconds).
    pub reconnect_backoff_ms: u64,
    /// Deadline for establishing the TCP session (milliseconds).
    pub connect_timeout_ms: u64,
    /// Deadline for one read or write transaction (milliseconds).
    pub request_timeout_ms: u64,
    /// Log every frame in hex through `tracing`.
    pub packet_logging: bool,
    /// Meter product line; decides the feeder register layout.
    pub family: MeterFamily,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings matching the meters' own firmware defaults: 10 s polling.
    pub fn slow() -> Self {
        Self {
            poll_interval_ms: 10_000,
            ..Self::default()
        }
    }

    pub fn with_unit_id(mut self, unit_id: SlaveId) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_reconnect_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.reconnect_backoff_ms = backoff_ms;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn with_family(mut self, family: MeterFamily) -> Self {
        self.family = family;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject zero intervals and timeouts.
    ///
    /// A zero backoff is allowed and means reconnect immediately.
    pub fn validate(&self) -> ModbusResult<()> {
        let checks = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ModbusError::configuration(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }

    /// Parse from JSON, filling missing keys with defaults.
    pub fn from_json(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            unit_id: DEFAULT_UNIT_ID,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            packet_logging: false,
            family: MeterFamily::default(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(60));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(!config.packet_logging);
        assert_eq!(config.family, MeterFamily::Gems35xx);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConnectionConfig::new()
            .with_unit_id(3)
            .with_request_timeout_ms(750)
            .with_packet_logging(true)
            .with_family(MeterFamily::Gems3512);

        assert_eq!(config.unit_id, 3);
        assert_eq!(config.request_timeout(), Duration::from_millis(750));
        assert!(config.packet_logging);
        assert_eq!(config.family, MeterFamily::Gems3512);
    }

    #[test]
    fn test_slow_preset() {
        assert_eq!(ConnectionConfig::slow().poll_interval_ms, 10_000);
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionConfig::new().with_poll_interval_ms(0).validate().is_err());
        assert!(ConnectionConfig::new().with_request_timeout_ms(0).validate().is_err());
        assert!(ConnectionConfig::new()
            .with_reconnect_backoff_ms(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            ConnectionConfig::from_json(r#"{"poll_interval_ms": 10000, "family": "gems3512"}"#)
                .unwrap();
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.family, MeterFamily::Gems3512);
        assert_eq!(config.reconnect_backoff_ms, DEFAULT_RECONNECT_BACKOFF_MS);
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(matches!(
            ConnectionConfig::from_json("{not json"),
            Err(ModbusError::Configuration { .. })
        ));
        assert!(ConnectionConfig::from_json(r#"{"request_timeout_ms": 0}"#).is_err());
    }
}
