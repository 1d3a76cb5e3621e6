//! Error types for register polling
//!
//! Errors fall into four groups that drive different recovery paths:
//!
//! | Group | Variants | Effect |
//! |-------|----------|--------|
//! | Address | `Address` | task fails immediately, nothing is sent |
//! | Transport | `Connection`, `Io`, `Timeout`, `Frame`, `NotConnected` | session torn down, reconnect scheduled |
//! | Decode | `InvalidData`, `Exception` | reported to the caller, session stays up |
//! | Lookup | `UnknownField` | logged, no state mutation |
//!
//! [`ModbusError::is_transport`] is the only classifier the connection worker
//! consults before tearing a session down.

use thiserror::Error;

use crate::constants::exception_name;

fn describe_exception(code: &u8) -> &'static str {
    exception_name(*code)
}

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by transports, clients, connections and devices
#[derive(Debug, Clone, Error)]
pub enum ModbusError {
    /// Register address outside the 3xxxx/4xxxx blocks, or a range crossing one
    #[error("Invalid register address {address}: {message}")]
    Address { address: u32, message: String },

    /// Connection could not be established or was lost
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Socket level failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// A transaction or connect attempt did not finish in time
    #[error("Timeout: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// MBAP framing violated (bad protocol id, transaction mismatch, oversized length)
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// No session is currently open
    #[error("Not connected")]
    NotConnected,

    /// Response payload could not be decoded
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Device answered with an exception response
    #[error("Modbus exception 0x{code:02X} ({}) for function 0x{function:02X}", describe_exception(.code))]
    Exception { function: u8, code: u8 },

    /// Function code this crate does not issue
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Protocol-level inconsistency that is not a framing problem
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Field name absent from the device's register table
    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    /// Task was drained from a queue because the session dropped
    #[error("Task cancelled: {reason}")]
    Cancelled { reason: String },

    /// Bad configuration value or device identifier
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    pub fn address(address: u32, message: impl Into<String>) -> Self {
        Self::Address {
            address,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error means the session can no longer be trusted.
    ///
    /// Timeouts count: a reply arriving after the deadline would be paired
    /// with the next request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Io { .. }
                | Self::Timeout { .. }
                | Self::Frame { .. }
                | Self::NotConnected
        )
    }

    /// Short machine-friendly category name, used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Address { .. } => "address",
            Self::Connection { .. }
            | Self::Io { .. }
            | Self::Timeout { .. }
            | Self::Frame { .. }
            | Self::NotConnected => "transport",
            Self::InvalidData { .. } | Self::Exception { .. } => "decode",
            Self::InvalidFunction { .. } | Self::Protocol { .. } => "protocol",
            Self::UnknownField { .. } => "unknown_field",
            Self::Cancelled { .. } => "cancelled",
            Self::Configuration { .. } => "configuration",
        }
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::connection(err.to_string()),
            _ => Self::Io {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("Invalid JSON settings: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(ModbusError::connection("reset").is_transport());
        assert!(ModbusError::timeout("read", 1000).is_transport());
        assert!(ModbusError::frame("tid mismatch").is_transport());
        assert!(ModbusError::NotConnected.is_transport());

        assert!(!ModbusError::address(29999, "below input block").is_transport());
        assert!(!ModbusError::invalid_data("odd byte count").is_transport());
        assert!(!ModbusError::Exception { function: 4, code: 2 }.is_transport());
        assert!(!ModbusError::unknown_field("bogus").is_transport());
        assert!(!ModbusError::cancelled("link down").is_transport());
    }

    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            ModbusError::from(refused),
            ModbusError::Connection { .. }
        ));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = ModbusError::from(other);
        assert!(matches!(err, ModbusError::Io { .. }));
        assert!(err.is_transport());
    }

    #[test]
    fn test_exception_display() {
        let err = ModbusError::Exception {
            function: 0x04,
            code: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "Modbus exception 0x02 (Illegal Data Address) for function 0x04"
        );
        assert_eq!(err.category(), "decode");
    }
}
