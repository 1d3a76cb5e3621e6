//! Host device identifiers
//!
//! Hosts name a consumer as `{gatewayId}-{host}:{port}[:{subId}]-{field}`, e.g.
//! `gw01-192.168.1.50:502:3-current`. The gateway id is everything before the
//! first `-` and the field is everything after the last one, so host names may
//! contain dashes.

use std::fmt;
use std::str::FromStr;

use crate::error::{ModbusError, ModbusResult};

/// Parsed form of a device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub gateway_id: String,
    pub host: String,
    pub port: u16,
    /// `None` addresses the base device
    pub sub_id: Option<u16>,
    pub field: String,
}

impl DeviceAddress {
    pub fn parse(id: &str) -> ModbusResult<Self> {
        let invalid = |reason: &str| {
            ModbusError::configuration(format!("Invalid device id '{}': {}", id, reason))
        };

        let (gateway_id, rest) = id.split_once('-').ok_or_else(|| invalid("missing gateway id"))?;
        let (endpoint, field) = rest.rsplit_once('-').ok_or_else(|| invalid("missing field"))?;
        if gateway_id.is_empty() {
            return Err(invalid("empty gateway id"));
        }
        if field.is_empty() {
            return Err(invalid("empty field"));
        }

        let mut parts = endpoint.split(':');
        let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(|| invalid("missing host"))?;
        let port = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid("missing or invalid port"))?;
        let sub_id = match parts.next() {
            None => None,
            Some(s) => Some(s.parse::<u16>().map_err(|_| invalid("invalid sub-id"))?),
        };
        if parts.next().is_some() {
            return Err(invalid("too many ':' separators"));
        }

        Ok(Self {
            gateway_id: gateway_id.to_string(),
            host: host.to_string(),
            port,
            sub_id,
            field: field.to_string(),
        })
    }

    pub fn sub_id_or_base(&self) -> u16 {
        self.sub_id.unwrap_or(crate::models::BASE_SUB_ID)
    }
}

impl FromStr for DeviceAddress {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}:{}", self.gateway_id, self.host, self.port)?;
        if let Some(sub_id) = self.sub_id {
            write!(f, ":{}", sub_id)?;
        }
        write!(f, "-{}", self.field)
    }
}
