//! Modbus request/response model and PDU encoding
//!
//! Only the register functions used by the polling engine are modelled:
//! FC03/FC04 for reads, FC06/FC16 for writes. Requests encode straight into a
//! [`BytesMut`] so the transport can prepend the MBAP header without copying.

use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::constants::{
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};

/// Modbus unit (slave) identifier
pub type SlaveId = u8;

/// Register functions issued by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleRegister,
    WriteMultipleRegisters,
}

impl ModbusFunction {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleRegisters => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }

    pub fn from_u8(code: u8) -> ModbusResult<Self> {
        match code {
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(Self::WriteMultipleRegisters),
            other => Err(ModbusError::invalid_function(other)),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

/// A single Modbus transaction request.
///
/// For writes, `data` carries the register values in big-endian order; the
/// FC16 byte count is added during encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: u16,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    pub fn read(slave_id: SlaveId, function: ModbusFunction, address: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    pub fn write_registers(slave_id: SlaveId, address: u16, values: &[u16]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 2);
        for value in values {
            data.extend_from_slice(&value.to_be_bytes());
        }
        let function = if values.len() == 1 {
            ModbusFunction::WriteSingleRegister
        } else {
            ModbusFunction::WriteMultipleRegisters
        };
        Self {
            slave_id,
            function,
            address,
            quantity: values.len() as u16,
            data,
        }
    }

    /// Check quantity limits before anything is put on the wire.
    pub fn validate(&self) -> ModbusResult<()> {
        match self.function {
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                if self.quantity == 0 || self.quantity as usize > MAX_READ_REGISTERS {
                    return Err(ModbusError::invalid_data(format!(
                        "Invalid read quantity: {} (must be 1-{})",
                        self.quantity, MAX_READ_REGISTERS
                    )));
                }
            }
            ModbusFunction::WriteSingleRegister => {
                if self.data.len() != 2 {
                    return Err(ModbusError::invalid_data(
                        "Write single register needs exactly one value",
                    ));
                }
            }
            ModbusFunction::WriteMultipleRegisters => {
                let count = self.quantity as usize;
                if count == 0 || count > MAX_WRITE_REGISTERS || self.data.len() != count * 2 {
                    return Err(ModbusError::invalid_data(format!(
                        "Invalid write quantity: {} registers, {} data bytes",
                        count,
                        self.data.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Encode the request PDU (function code onwards).
    pub fn encode_pdu(&self, buf: &mut BytesMut) -> ModbusResult<()> {
        self.validate()?;
        let start = buf.len();

        buf.put_u8(self.function.to_u8());
        buf.put_u16(self.address);
        match self.function {
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                buf.put_u16(self.quantity);
            }
            ModbusFunction::WriteSingleRegister => {
                buf.put_slice(&self.data);
            }
            ModbusFunction::WriteMultipleRegisters => {
                buf.put_u16(self.quantity);
                buf.put_u8(self.data.len() as u8);
                buf.put_slice(&self.data);
            }
        }

        let len = buf.len() - start;
        if len > MAX_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                len, MAX_PDU_SIZE
            )));
        }

        debug!(
            "PDU built: FC={:02X} ({}), addr={}, qty={}, total_len={}",
            self.function.to_u8(),
            self.function.description(),
            self.address,
            self.quantity,
            len
        );
        Ok(())
    }
}

/// A decoded response PDU.
///
/// `data` holds everything after the function code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    data: Vec<u8>,
}

impl ModbusResponse {
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
        }
    }

    /// Parse a response PDU, turning exception replies into [`ModbusError::Exception`].
    pub fn from_pdu(slave_id: SlaveId, pdu: &[u8]) -> ModbusResult<Self> {
        let (&fc, rest) = pdu
            .split_first()
            .ok_or_else(|| ModbusError::invalid_data("Empty response PDU"))?;

        if fc & 0x80 != 0 {
            let code = rest.first().copied().unwrap_or(0);
            return Err(ModbusError::Exception {
                function: fc & 0x7F,
                code,
            });
        }

        Ok(Self {
            slave_id,
            function: ModbusFunction::from_u8(fc)?,
            data: rest.to_vec(),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Extract register words from an FC03/FC04 response.
    ///
    /// The byte count must agree with the payload; a response carrying fewer
    /// registers than requested is still accepted here and left to the
    /// decoder, which treats the missing words as zero.
    pub fn parse_registers(&self) -> ModbusResult<Vec<u16>> {
        let (&byte_count, payload) = self
            .data
            .split_first()
            .ok_or_else(|| ModbusError::invalid_data("Missing byte count"))?;
        let byte_count = byte_count as usize;

        if byte_count % 2 != 0 {
            return Err(ModbusError::invalid_data(format!(
                "Odd register byte count: {}",
                byte_count
            )));
        }
        if payload.len() < byte_count {
            return Err(ModbusError::invalid_data(format!(
                "Short register payload: byte count {} but {} bytes present",
                byte_count,
                payload.len()
            )));
        }

        Ok(payload[..byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Check that a write echo matches the request.
    pub fn verify_write_echo(&self, request: &ModbusRequest) -> ModbusResult<()> {
        if self.function != request.function {
            return Err(ModbusError::protocol(format!(
                "Function mismatch: sent 0x{:02X}, got 0x{:02X}",
                request.function.to_u8(),
                self.function.to_u8()
            )));
        }
        if self.data.len() < 2 {
            return Err(ModbusError::invalid_data("Write response too short"));
        }
        let echoed = u16::from_be_bytes([self.data[0], self.data[1]]);
        if echoed != request.address {
            return Err(ModbusError::protocol(format!(
                "Write echo address mismatch: sent {}, got {}",
                request.address, echoed
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(request: &ModbusRequest) -> Vec<u8> {
        let mut buf = BytesMut::new();
        request.encode_pdu(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_read_request_pdu() {
        let request = ModbusRequest::read(1, ModbusFunction::ReadInputRegisters, 0x006B, 3);
        assert_eq!(encode(&request), vec![0x04, 0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn test_write_single_register_pdu() {
        let request = ModbusRequest::write_registers(1, 0x0001, &[0x0003]);
        assert_eq!(request.function, ModbusFunction::WriteSingleRegister);
        assert_eq!(encode(&request), vec![0x06, 0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn test_write_multiple_registers_pdu() {
        let request = ModbusRequest::write_registers(1, 0x0001, &[0x000A, 0x0102]);
        assert_eq!(
            encode(&request),
            vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_read_quantity_limits() {
        let zero = ModbusRequest::read(1, ModbusFunction::ReadHoldingRegisters, 0, 0);
        assert!(zero.validate().is_err());

        let too_many = ModbusRequest::read(1, ModbusFunction::ReadHoldingRegisters, 0, 126);
        assert!(too_many.validate().is_err());

        let max = ModbusRequest::read(1, ModbusFunction::ReadHoldingRegisters, 0, 125);
        assert!(max.validate().is_ok());
    }

    #[test]
    fn test_parse_registers() {
        let response = ModbusResponse::new_success(
            1,
            ModbusFunction::ReadInputRegisters,
            vec![0x04, 0x00, 0x00, 0x03, 0xE8],
        );
        assert_eq!(response.parse_registers().unwrap(), vec![0x0000, 0x03E8]);
    }

    #[test]
    fn test_parse_registers_rejects_malformed_payload() {
        let odd = ModbusResponse::new_success(
            1,
            ModbusFunction::ReadInputRegisters,
            vec![0x03, 0x00, 0x01, 0x02],
        );
        assert!(matches!(
            odd.parse_registers(),
            Err(ModbusError::InvalidData { .. })
        ));

        let short = ModbusResponse::new_success(
            1,
            ModbusFunction::ReadInputRegisters,
            vec![0x04, 0x00, 0x01],
        );
        assert!(matches!(
            short.parse_registers(),
            Err(ModbusError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_exception_response() {
        let err = ModbusResponse::from_pdu(1, &[0x84, 0x02]).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Exception {
                function: 0x04,
                code: 0x02
            }
        ));
    }

    #[test]
    fn test_write_echo() {
        let request = ModbusRequest::write_registers(1, 100, &[0x1234, 0x0000]);
        let echo = ModbusResponse::from_pdu(1, &[0x10, 0x00, 0x64, 0x00, 0x02]).unwrap();
        assert!(echo.verify_write_echo(&request).is_ok());

        let wrong = ModbusResponse::from_pdu(1, &[0x10, 0x00, 0x65, 0x00, 0x02]).unwrap();
        assert!(wrong.verify_write_echo(&request).is_err());
    }
}
