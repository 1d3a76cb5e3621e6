//! Protocol and polling constants
//!
//! Frame limits follow the Modbus application protocol specification:
//! - Maximum PDU size: 253 bytes (inherited from RS485 ADU limit of 256 bytes)
//! - Register limits are calculated to fit within the PDU size constraint
//!
//! Register addresses use the 5-digit convention of the metering devices:
//! `3xxxx` for input registers and `4xxxx` for holding registers.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length for TCP, excluding the unit id.
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04
///
/// Response PDU: FC(1) + Byte Count(1) + N × 2 ≤ 253, therefore N ≤ 125
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16
///
/// Request PDU: FC(1) + Addr(2) + Qty(2) + Byte Count(1) + N × 2 ≤ 253, therefore N ≤ 123
pub const MAX_WRITE_REGISTERS: usize = 123;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// ============================================================================
// Register Classes
// ============================================================================

/// First address of the input register block (`30000` maps to offset 0)
pub const INPUT_REGISTER_BASE: u32 = 30000;

/// Last address of the input register block
pub const INPUT_REGISTER_LAST: u32 = 39999;

/// First address of the holding register block (`40000` maps to offset 0)
pub const HOLDING_REGISTER_BASE: u32 = 40000;

/// Last address of the holding register block
pub const HOLDING_REGISTER_LAST: u32 = 49999;

// ============================================================================
// Polling Defaults
// ============================================================================

/// Default Modbus unit id
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Maximum number of historical samples kept per field
pub const MAX_HISTORY: usize = 100;

/// Default interval between poll cycles (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default delay before a dropped connection is re-established (milliseconds)
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 60_000;

/// Default connect timeout (milliseconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default timeout for a single read or write transaction (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

/// Human-readable name of an exception code
pub fn exception_name(code: u8) -> &'static str {
    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "Illegal Function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal Data Address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal Data Value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "Server Device Failure",
        0x05 => "Acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "Server Device Busy",
        0x08 => "Memory Parity Error",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway Path Unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
