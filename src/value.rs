//! # Register and Field Values
//!
//! Two layers of values flow through the engine:
//!
//! | Type | Produced by | Holds |
//! |------|-------------|-------|
//! | [`ModbusValue`] | wire decoding | the raw integer or float read from registers |
//! | [`FieldValue`] | converters | the physical value or label handed to consumers |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw value decoded from one or two registers.
///
/// # Example
///
/// ```rust
/// use voltage_poller::ModbusValue;
///
/// let raw = ModbusValue::U32(1000);
/// assert_eq!(raw.register_count(), 2);
/// assert_eq!(raw.as_f64(), 1000.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModbusValue {
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
}

impl ModbusValue {
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            ModbusValue::U16(v) => f64::from(*v),
            ModbusValue::I16(v) => f64::from(*v),
            ModbusValue::U32(v) => f64::from(*v),
            ModbusValue::I32(v) => f64::from(*v),
            ModbusValue::F32(v) => f64::from(*v),
        }
    }

    /// Integer view, used for enumerated codes. Floats are rounded.
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self {
            ModbusValue::U16(v) => i64::from(*v),
            ModbusValue::I16(v) => i64::from(*v),
            ModbusValue::U32(v) => i64::from(*v),
            ModbusValue::I32(v) => i64::from(*v),
            ModbusValue::F32(v) => v.round() as i64,
        }
    }

    #[inline]
    pub fn register_count(&self) -> usize {
        match self {
            ModbusValue::U16(_) | ModbusValue::I16(_) => 1,
            ModbusValue::U32(_) | ModbusValue::I32(_) | ModbusValue::F32(_) => 2,
        }
    }
}

impl fmt::Display for ModbusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModbusValue::U16(v) => write!(f, "{}", v),
            ModbusValue::I16(v) => write!(f, "{}", v),
            ModbusValue::U32(v) => write!(f, "{}", v),
            ModbusValue::I32(v) => write!(f, "{}", v),
            ModbusValue::F32(v) => write!(f, "{}", v),
        }
    }
}

/// Converted value of a field as seen by consumers.
///
/// Serializes untagged, so a number stays a JSON number and a label a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Label(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Label(s) => Some(s),
        }
    }

    /// Whether `self` differs from `previous` by at least `delta`.
    ///
    /// Labels, and a number compared against a label, differ whenever they are
    /// not equal.
    pub fn differs_by(&self, previous: &FieldValue, delta: f64) -> bool {
        match (self, previous) {
            (FieldValue::Number(a), FieldValue::Number(b)) => (a - b).abs() >= delta,
            _ => self != previous,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Label(s.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{}", v),
            FieldValue::Label(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_views() {
        assert_eq!(ModbusValue::I16(-5).as_f64(), -5.0);
        assert_eq!(ModbusValue::I32(-70000).as_i64(), -70000);
        assert_eq!(ModbusValue::F32(2.6).as_i64(), 3);
        assert_eq!(ModbusValue::U16(1).register_count(), 1);
        assert_eq!(ModbusValue::F32(0.0).register_count(), 2);
    }

    #[test]
    fn test_differs_by() {
        let prev = FieldValue::Number(10.0);
        assert!(!FieldValue::Number(10.5).differs_by(&prev, 1.0));
        assert!(FieldValue::Number(11.0).differs_by(&prev, 1.0));
        assert!(FieldValue::Number(8.9).differs_by(&prev, 1.0));

        let label = FieldValue::from("3P4W");
        assert!(!FieldValue::from("3P4W").differs_by(&label, 1.0));
        assert!(FieldValue::from("ZCT").differs_by(&label, 1.0));
        assert!(FieldValue::Number(5.0).differs_by(&label, 1.0));
    }

    #[test]
    fn test_untagged_json() {
        assert_eq!(serde_json::to_string(&FieldValue::Number(10.5)).unwrap(), "10.5");
        assert_eq!(
            serde_json::to_string(&FieldValue::from("Not Used")).unwrap(),
            "\"Not Used\""
        );
    }
}
