//! # Register Codec
//!
//! Slices a block of register words into typed values and applies unit
//! converters.
//!
//! ## Supported Wire Types
//!
//! | Type | Registers | Aliases |
//! |------|-----------|---------|
//! | u16 | 1 | uint16, word |
//! | i16 | 1 | int16, short |
//! | u32 | 2 | uint32, dword |
//! | i32 | 2 | int32, long |
//! | f32 | 2 | float32, float, real |
//!
//! Multi-register values are big-endian, high word first. Words missing from a
//! short read decode as zero.

use std::str::FromStr;

use crate::error::{ModbusError, ModbusResult};
use crate::value::{FieldValue, ModbusValue};

/// Wire encoding of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl WireType {
    #[inline]
    pub fn register_count(self) -> usize {
        match self {
            WireType::U16 | WireType::I16 => 1,
            WireType::U32 | WireType::I32 | WireType::F32 => 2,
        }
    }

    /// Decode the value starting at `offset` within `registers`.
    ///
    /// Registers past the end of the slice read as `0`, so a truncated
    /// response degrades to zero instead of failing.
    pub fn decode(self, registers: &[u16], offset: usize) -> ModbusValue {
        let word = |i: usize| registers.get(offset + i).copied().unwrap_or(0);
        match self {
            WireType::U16 => ModbusValue::U16(word(0)),
            WireType::I16 => ModbusValue::I16(word(0) as i16),
            WireType::U32 => ModbusValue::U32(u32::from_be_bytes(be_bytes(word(0), word(1)))),
            WireType::I32 => ModbusValue::I32(i32::from_be_bytes(be_bytes(word(0), word(1)))),
            WireType::F32 => ModbusValue::F32(f32::from_be_bytes(be_bytes(word(0), word(1)))),
        }
    }
}

impl FromStr for WireType {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uint16" | "u16" | "word" => Ok(WireType::U16),
            "int16" | "i16" | "short" => Ok(WireType::I16),
            "uint32" | "u32" | "dword" => Ok(WireType::U32),
            "int32" | "i32" | "long" => Ok(WireType::I32),
            "float32" | "f32" | "float" | "real" => Ok(WireType::F32),
            other => Err(ModbusError::configuration(format!(
                "Unsupported wire type: {}",
                other
            ))),
        }
    }
}

#[inline]
fn be_bytes(high: u16, low: u16) -> [u8; 4] {
    let [a, b] = high.to_be_bytes();
    let [c, d] = low.to_be_bytes();
    [a, b, c, d]
}

/// Split a 32-bit value into two registers, high word first.
#[inline]
pub fn u32_to_registers(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

// ============================================================================
// Converters
// ============================================================================

/// Labels for the feeder wiring topology code
pub const FEEDER_TYPE_LABELS: [&str; 9] = [
    "Not Used",
    "1P2W_R(1P3W_RN)",
    "1P2W_S(1P3W_RS)",
    "1P2W_T(1P3WSN)",
    "3P2W_2CT",
    "3P4W",
    "ZCT",
    "3P3W_3CT",
    "1P3W_2CT",
];

/// Label for codes outside a lookup table
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Raw-to-physical conversion applied after wire decoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Converter {
    /// Pass the raw number through
    Raw,
    /// Restore a fixed-point scale, e.g. `Divide(100.0)` for hundredths
    Divide(f64),
    /// Map a code to a label; codes past the end map to [`UNKNOWN_LABEL`]
    Lookup(&'static [&'static str]),
}

impl Converter {
    pub const FEEDER_TYPE: Converter = Converter::Lookup(&FEEDER_TYPE_LABELS);

    pub fn apply(&self, raw: ModbusValue) -> FieldValue {
        match self {
            Converter::Raw => FieldValue::Number(raw.as_f64()),
            Converter::Divide(divisor) => FieldValue::Number(raw.as_f64() / divisor),
            Converter::Lookup(labels) => {
                let label = usize::try_from(raw.as_i64())
                    .ok()
                    .and_then(|code| labels.get(code))
                    .copied()
                    .unwrap_or(UNKNOWN_LABEL);
                FieldValue::Label(label.to_string())
            }
        }
    }
}

/// Decode and convert a single field.
pub fn decode_field(
    registers: &[u16],
    offset: usize,
    wire: WireType,
    converter: Converter,
) -> FieldValue {
    converter.apply(wire.decode(registers, offset))
}

/// Check a register block against the count that was requested.
///
/// Extra words are a decode error; missing words are tolerated and read as zero.
pub fn check_block(registers: &[u16], expected: u16) -> ModbusResult<()> {
    if registers.len() > expected as usize {
        return Err(ModbusError::invalid_data(format!(
            "Expected at most {} registers, got {}",
            expected,
            registers.len()
        )));
    }
    Ok(())
}
