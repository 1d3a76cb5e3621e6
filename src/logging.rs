//! Packet and event logging
//!
//! The library itself logs through `tracing`. [`CallbackLogger`] is an
//! optional extra sink attached to a client for hex dumps of every request and
//! response, either routed to `tracing` or handed to a host callback.

use std::fmt;
use std::sync::Arc;

/// Severity for callback log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

/// Host-supplied sink for log lines
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Where [`CallbackLogger`] output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    Disabled,
    Tracing,
    Callback,
}

/// Packet logger attached to a client
#[derive(Clone)]
pub struct CallbackLogger {
    mode: LoggingMode,
    min_level: LogLevel,
    callback: Option<LogCallback>,
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("mode", &self.mode)
            .field("min_level", &self.min_level)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::tracing(LogLevel::Debug)
    }
}

impl CallbackLogger {
    /// Logger forwarding to a host callback.
    pub fn new(callback: LogCallback, min_level: LogLevel) -> Self {
        Self {
            mode: LoggingMode::Callback,
            min_level,
            callback: Some(callback),
        }
    }

    /// Logger emitting through `tracing` macros.
    pub fn tracing(min_level: LogLevel) -> Self {
        Self {
            mode: LoggingMode::Tracing,
            min_level,
            callback: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            mode: LoggingMode::Disabled,
            min_level: LogLevel::Error,
            callback: None,
        }
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.mode != LoggingMode::Disabled && level <= self.min_level
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }
        match self.mode {
            LoggingMode::Disabled => {}
            LoggingMode::Tracing => match level {
                LogLevel::Error => tracing::error!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Trace => tracing::trace!("{}", message),
            },
            LoggingMode::Callback => {
                if let Some(callback) = &self.callback {
                    callback(level, message);
                }
            }
        }
    }

    pub fn log_request(
        &self,
        slave_id: u8,
        function: u8,
        address: u16,
        quantity: u16,
        data: &[u8],
    ) {
        if !self.enabled(LogLevel::Debug) {
            return;
        }
        let mut line = format!(
            "-> slave={} fc=0x{:02X} addr={} qty={}",
            slave_id, function, address, quantity
        );
        if !data.is_empty() {
            line.push_str(" data=");
            line.push_str(&hex(data));
        }
        self.log(LogLevel::Debug, &line);
    }

    pub fn log_response(&self, slave_id: u8, function: u8, data: &[u8]) {
        if !self.enabled(LogLevel::Debug) {
            return;
        }
        let line = format!(
            "<- slave={} fc=0x{:02X} data={}",
            slave_id,
            function,
            hex(data)
        );
        self.log(LogLevel::Debug, &line);
    }

    /// Raw frame dump, used by transports with packet logging on.
    pub fn log_packet(&self, direction: &str, frame: &[u8]) {
        if !self.enabled(LogLevel::Debug) {
            return;
        }
        self.log(LogLevel::Debug, &format!("{} {}", direction, hex(frame)));
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn capture(min_level: LogLevel) -> (CallbackLogger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let lines: Arc<Mutex<Vec<(LogLevel, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let callback: LogCallback = Arc::new(move |level: LogLevel, msg: &str| {
            sink.lock().push((level, msg.to_string()));
        });
        (CallbackLogger::new(callback, min_level), lines)
    }

    #[test]
    fn test_request_response_hex() {
        let (logger, lines) = capture(LogLevel::Debug);
        logger.log_request(1, 0x10, 100, 2, &[0x00, 0x00, 0x12, 0x34]);
        logger.log_response(1, 0x04, &[0x02, 0x03, 0xE8]);

        let lines = lines.lock();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0].1,
            "-> slave=1 fc=0x10 addr=100 qty=2 data=00 00 12 34"
        );
        assert_eq!(lines[1].1, "<- slave=1 fc=0x04 data=02 03 E8");
    }

    #[test]
    fn test_level_filter() {
        let (logger, lines) = capture(LogLevel::Warn);
        logger.log(LogLevel::Info, "dropped");
        logger.log(LogLevel::Error, "kept");
        logger.log_packet("TX", &[0x01]);

        let lines = lines.lock();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], (LogLevel::Error, "kept".to_string()));
    }

    #[test]
    fn test_disabled_logger() {
        let logger = CallbackLogger::disabled();
        assert!(!logger.enabled(LogLevel::Error));
        assert_eq!(logger.mode(), LoggingMode::Disabled);
    }
}
