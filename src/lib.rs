//! # Voltage Poller - Modbus TCP Polling Engine for Power Meters
//!
//! Polls multi-circuit power meters over Modbus TCP and pushes decoded,
//! unit-scaled readings to subscribed consumers.
//!
//! ## Features
//!
//! - **One session per meter**: every consumer naming the same `host:port`
//!   shares one [`PhysicalConnection`] and its TCP socket
//! - **Serialized I/O**: a single worker per connection runs one transaction
//!   at a time, writes ahead of reads, each bounded by a timeout
//! - **Logical devices**: the base meter and each feeder are separate
//!   [`LogicalDevice`]s with their own register table
//! - **Emit policies**: per field, push every sample, only changes, or
//!   batches of changes ([`EmitPolicy`])
//! - **Automatic recovery**: transport errors drain the queues and reconnect
//!   after a configurable backoff
//!
//! ## Register Addressing
//!
//! | Address block | Class | Function |
//! |---------------|-------|----------|
//! | 30000-39999 | Input registers | 0x04 |
//! | 40000-49999 | Holding registers | 0x03 read, 0x06 / 0x10 write |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_poller::{ConnectionConfig, ConnectionRegistry, Consumer, ModbusResult, TcpConnector};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let registry = ConnectionRegistry::with_connector(TcpConnector, ConnectionConfig::slow());
//!
//!     // Base device field on the meter at 192.168.1.50:502
//!     let consumer = Consumer::new("gw01-192.168.1.50:502-V1", "V1", "voltage");
//!     let (_device, mut updates) = registry.attach(consumer)?;
//!
//!     while let Some(update) = updates.recv().await {
//!         println!("{}", update.to_json());
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// Protocol modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants and polling defaults
pub mod constants;

/// Modbus request/response PDUs
pub mod protocol;

/// Modbus TCP transport with MBAP framing
pub mod transport;

/// Register-level Modbus clients
pub mod client;

/// Packet logging hooks
pub mod logging;

// ============================================================================
// Decoding
// ============================================================================

/// Typed register values and decoded field values
pub mod value;

/// Wire types and unit converters
pub mod codec;

/// Address ranges, field specs and register tables
pub mod register;

/// Register tables of the supported meter models
pub mod models;

// ============================================================================
// Polling engine
// ============================================================================

/// Emit policies deciding which samples reach a consumer
pub mod emit;

/// Field run-time state and history
pub mod field;

/// Consumers, subscriptions and notification payloads
pub mod notify;

/// Logical sub-devices of a meter
pub mod device;

/// Physical connections, task queues and the connection worker
pub mod connection;

/// Shared connection lookup
pub mod registry;

/// Host device identifier parsing
pub mod addressing;

/// Per-connection settings
pub mod config;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_poller::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Client API ===
pub use client::{GenericModbusClient, ModbusClient, ModbusTcpClient};
pub use protocol::{ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
pub use transport::{ModbusTransport, TcpTransport, TransportStats};

// === Decoding ===
pub use codec::{Converter, WireType};
pub use models::{DeviceModel, MeterFamily};
pub use register::{AddressRange, CommandSpec, FieldSpec, RegisterClass, RegisterTable};
pub use value::{FieldValue, ModbusValue};

// === Polling engine ===
pub use addressing::DeviceAddress;
pub use config::ConnectionConfig;
pub use connection::{
    ConnectionState, ConnectionStats, Connector, PhysicalConnection, TcpConnector, WriteStep,
};
pub use device::LogicalDevice;
pub use emit::{EmitPolicy, EmitTracker, Emission};
pub use field::{FieldState, Sample};
pub use notify::{Consumer, EventKind, Notification, Payload, Status, Subscription};
pub use registry::ConnectionRegistry;

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

// === Protocol limits ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
