//! Register address model and per-device register tables
//!
//! Device documentation numbers registers with a 5-digit convention. The
//! leading digit picks the register class and the rest is the protocol
//! offset:
//!
//! | Range | Class | Read function |
//! |-------|-------|---------------|
//! | 30000-39999 | input | 0x04 |
//! | 40000-49999 | holding | 0x03 |
//!
//! A [`RegisterTable`] lists the ranges a logical device reads each poll
//! cycle, the fields decoded out of them and the write-only commands it
//! accepts.

use std::fmt;

use crate::codec::{Converter, WireType};
use crate::constants::{
    HOLDING_REGISTER_BASE, HOLDING_REGISTER_LAST, INPUT_REGISTER_BASE, INPUT_REGISTER_LAST,
    MAX_READ_REGISTERS,
};
use crate::emit::EmitPolicy;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusFunction;

/// Register class selected by the address block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    Input,
    Holding,
}

impl RegisterClass {
    /// Split a 5-digit register address into its class and protocol offset.
    pub fn resolve(address: u32) -> ModbusResult<(RegisterClass, u16)> {
        match address {
            INPUT_REGISTER_BASE..=INPUT_REGISTER_LAST => {
                Ok((RegisterClass::Input, (address - INPUT_REGISTER_BASE) as u16))
            }
            HOLDING_REGISTER_BASE..=HOLDING_REGISTER_LAST => Ok((
                RegisterClass::Holding,
                (address - HOLDING_REGISTER_BASE) as u16,
            )),
            _ => Err(ModbusError::address(
                address,
                "outside the input (3xxxx) and holding (4xxxx) blocks",
            )),
        }
    }

    pub fn read_function(self) -> ModbusFunction {
        match self {
            RegisterClass::Input => ModbusFunction::ReadInputRegisters,
            RegisterClass::Holding => ModbusFunction::ReadHoldingRegisters,
        }
    }
}

/// A contiguous block read in one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    pub start: u32,
    pub count: u16,
}

impl AddressRange {
    pub const fn new(start: u32, count: u16) -> Self {
        Self { start, count }
    }

    /// One past the last register in the range
    pub fn end(&self) -> u32 {
        self.start + u32::from(self.count)
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end()
    }

    /// Resolve to a register class and protocol offset, validating the range.
    ///
    /// The count must be 1-125 and the whole range must sit in one block.
    pub fn resolve(&self) -> ModbusResult<(RegisterClass, u16)> {
        if self.count == 0 || self.count as usize > MAX_READ_REGISTERS {
            return Err(ModbusError::address(
                self.start,
                format!(
                    "register count {} outside 1-{}",
                    self.count, MAX_READ_REGISTERS
                ),
            ));
        }
        let (class, offset) = RegisterClass::resolve(self.start)?;
        let (last_class, _) = RegisterClass::resolve(self.end() - 1)?;
        if class != last_class {
            return Err(ModbusError::address(
                self.start,
                format!("range of {} crosses a register block boundary", self.count),
            ));
        }
        Ok((class, offset))
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.start, self.count)
    }
}

/// Static description of one decoded field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub address: u32,
    pub wire: WireType,
    pub converter: Converter,
    pub emit: EmitPolicy,
}

impl FieldSpec {
    pub fn new(name: &'static str, address: u32, wire: WireType, converter: Converter) -> Self {
        Self {
            name,
            address,
            wire,
            converter,
            emit: EmitPolicy::Always,
        }
    }

    pub fn with_emit(mut self, emit: EmitPolicy) -> Self {
        self.emit = emit;
        self
    }
}

/// Write-only endpoint: a pulse written to a holding-register pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub address: u32,
    /// Words written first; a run of zeros of the same length follows.
    pub pulse: Vec<u16>,
}

/// Ranges, fields and commands of a logical device
#[derive(Debug, Clone, Default)]
pub struct RegisterTable {
    pub ranges: Vec<AddressRange>,
    pub fields: Vec<FieldSpec>,
    pub commands: Vec<CommandSpec>,
}

impl RegisterTable {
    pub fn new(ranges: Vec<AddressRange>) -> Self {
        Self {
            ranges,
            fields: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn find_command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Every field whose first register lies inside `range`, with its word offset.
    pub fn fields_in(&self, range: AddressRange) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.fields
            .iter()
            .enumerate()
            .filter(move |(_, f)| range.contains(f.address))
            .map(move |(i, f)| (i, (f.address - range.start) as usize))
    }

    /// Check every range resolves and every field falls in exactly one range.
    pub fn validate(&self) -> ModbusResult<()> {
        for range in &self.ranges {
            range.resolve()?;
        }
        for field in &self.fields {
            let owners = self.ranges.iter().filter(|r| r.contains(field.address)).count();
            if owners != 1 {
                return Err(ModbusError::address(
                    field.address,
                    format!("field {} lies in {} ranges, expected 1", field.name, owners),
                ));
            }
        }
        for command in &self.commands {
            let (class, _) = RegisterClass::resolve(command.address)?;
            if class != RegisterClass::Holding {
                return Err(ModbusError::address(
                    command.address,
                    format!("command {} must target holding registers", command.name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_register_class() {
        assert_eq!(
            RegisterClass::resolve(30000).unwrap(),
            (RegisterClass::Input, 0)
        );
        assert_eq!(
            RegisterClass::resolve(39999).unwrap(),
            (RegisterClass::Input, 9999)
        );
        assert_eq!(
            RegisterClass::resolve(40101).unwrap(),
            (RegisterClass::Holding, 101)
        );
        assert!(matches!(
            RegisterClass::resolve(29999),
            Err(ModbusError::Address { address: 29999, .. })
        ));
        assert!(RegisterClass::resolve(50000).is_err());
    }

    #[test]
    fn test_read_function_by_class() {
        assert_eq!(
            RegisterClass::Input.read_function(),
            ModbusFunction::ReadInputRegisters
        );
        assert_eq!(
            RegisterClass::Holding.read_function(),
            ModbusFunction::ReadHoldingRegisters
        );
    }

    #[test]
    fn test_range_validation() {
        assert!(AddressRange::new(30000, 104).resolve().is_ok());
        assert!(AddressRange::new(30000, 0).resolve().is_err());
        assert!(AddressRange::new(30000, 126).resolve().is_err());
        // 39990..40010 straddles the input/holding boundary
        assert!(AddressRange::new(39990, 20).resolve().is_err());
        assert!(AddressRange::new(39990, 10).resolve().is_ok());
    }

    #[test]
    fn test_fields_in_range() {
        let table = RegisterTable::new(vec![
            AddressRange::new(30000, 10),
            AddressRange::new(30100, 10),
        ])
        .field(FieldSpec::new("a", 30001, WireType::U16, Converter::Raw))
        .field(FieldSpec::new("b", 30105, WireType::U32, Converter::Raw))
        .field(FieldSpec::new("c", 30009, WireType::U16, Converter::Raw));

        let first: Vec<_> = table.fields_in(table.ranges[0]).collect();
        assert_eq!(first, vec![(0, 1), (2, 9)]);

        let second: Vec<_> = table.fields_in(table.ranges[1]).collect();
        assert_eq!(second, vec![(1, 5)]);

        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_orphan_field() {
        let table = RegisterTable::new(vec![AddressRange::new(30000, 10)]).field(FieldSpec::new(
            "orphan",
            30050,
            WireType::U16,
            Converter::Raw,
        ));
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_input_command() {
        let table = RegisterTable::new(vec![AddressRange::new(30000, 10)]).command(CommandSpec {
            name: "bad",
            address: 30001,
            pulse: vec![1],
        });
        assert!(table.validate().is_err());
    }
}
