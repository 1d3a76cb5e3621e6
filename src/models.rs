//! Register maps of the supported meter models
//!
//! | Model | Sub-id | Ranges | Notes |
//! |-------|--------|--------|-------|
//! | Base | 0 | `30000 x 104` | voltages, temperature, frequency, `demandReset` |
//! | Feeder (GEMS35xx) | n >= 1 | `30080 + 40n x 40` | per-channel current, power, PF, THD |
//! | CompactFeeder (GEMS3512) | n >= 1 | `32420 + 64(n-1) x 64`, `36000 + 34(n-1) x 34`, `38000 + 18(n-1) x 18` | wiring type and leakage currents |
//! | Direct | 0 | `40015 x 42`, `40225 x 2` | float/u32 holding registers, no sub-devices |

use serde::{Deserialize, Serialize};

use crate::codec::{u32_to_registers, Converter, WireType};
use crate::emit::{EmitPolicy, DEFAULT_CHANGE_DELTA, DEFAULT_FLUSH_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::register::{AddressRange, CommandSpec, FieldSpec, RegisterClass, RegisterTable};

/// Sub-id of the base device on every meter
pub const BASE_SUB_ID: u16 = 0;

/// Holding-register pair pulsed by `demandReset`
pub const DEMAND_RESET_ADDRESS: u32 = 40101;

/// Sentinel written to trigger a demand reset
pub const DEMAND_RESET_SENTINEL: u32 = 0x1234;

const HUNDREDTHS: Converter = Converter::Divide(100.0);
const TENTHS: Converter = Converter::Divide(10.0);

/// Meter product line, which decides how numbered sub-devices are laid out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterFamily {
    #[default]
    Gems35xx,
    Gems3512,
    /// Single meter exposing its readings as holding registers
    Direct,
}

/// Logical device model bound to a sub-id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceModel {
    Base,
    Feeder(u16),
    CompactFeeder(u16),
    Direct,
}

impl DeviceModel {
    /// Pick the model for `sub_id`: 0 is the base device, anything else a feeder.
    ///
    /// A direct meter has no sub-devices, so every sub-id maps to it.
    pub fn for_sub_id(family: MeterFamily, sub_id: u16) -> Self {
        match (sub_id, family) {
            (_, MeterFamily::Direct) => DeviceModel::Direct,
            (BASE_SUB_ID, _) => DeviceModel::Base,
            (n, MeterFamily::Gems35xx) => DeviceModel::Feeder(n),
            (n, MeterFamily::Gems3512) => DeviceModel::CompactFeeder(n),
        }
    }

    pub fn sub_id(&self) -> u16 {
        match self {
            DeviceModel::Base | DeviceModel::Direct => BASE_SUB_ID,
            DeviceModel::Feeder(n) | DeviceModel::CompactFeeder(n) => *n,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceModel::Base => "base",
            DeviceModel::Feeder(_) => "feeder",
            DeviceModel::CompactFeeder(_) => "compact-feeder",
            DeviceModel::Direct => "direct",
        }
    }

    /// Register class every range of this model reads from.
    pub fn register_class(&self) -> RegisterClass {
        match self {
            DeviceModel::Direct => RegisterClass::Holding,
            _ => RegisterClass::Input,
        }
    }

    /// Build and validate the register table.
    ///
    /// Fails with an address error when a feeder index pushes its block
    /// past the end of the register space.
    pub fn table(&self) -> ModbusResult<RegisterTable> {
        let table = match *self {
            DeviceModel::Base => base_table(),
            DeviceModel::Feeder(n) => feeder_table(n),
            DeviceModel::CompactFeeder(n) => compact_feeder_table(n),
            DeviceModel::Direct => direct_table(),
        };
        table.validate()?;
        let expected = self.register_class();
        for range in &table.ranges {
            let (class, _) = range.resolve()?;
            if class != expected {
                return Err(ModbusError::address(
                    range.start,
                    format!("{} {} must read {:?} registers", self.name(), self.sub_id(), expected),
                ));
            }
        }
        Ok(table)
    }
}

fn base_table() -> RegisterTable {
    let u32_v = |name, address| FieldSpec::new(name, address, WireType::U32, HUNDREDTHS);
    let u16_v = |name, address| FieldSpec::new(name, address, WireType::U16, HUNDREDTHS);

    RegisterTable::new(vec![AddressRange::new(30000, 104)])
        .field(FieldSpec::new("temperature", 30001, WireType::U16, TENTHS))
        .field(FieldSpec::new("frequency", 30002, WireType::U16, HUNDREDTHS))
        .field(u32_v("V123LNAverage", 30064))
        .field(u32_v("V123LLAverage", 30066))
        .field(u16_v("V123LNUnbalance", 30068))
        .field(u16_v("V123LLUnbalance", 30069))
        .field(u32_v("V1", 30070))
        .field(u32_v("V12", 30072))
        .field(u16_v("V1Unbalance", 30074))
        .field(u16_v("V12Unbalance", 30075))
        .field(u32_v("V2", 30076))
        .field(u32_v("V23", 30078))
        .field(u16_v("V2Unbalance", 30080))
        .field(u16_v("V23Unbalance", 30081))
        .field(u32_v("V3", 30082))
        .field(u32_v("V31", 30084))
        .field(u16_v("V3Unbalance", 30086))
        .field(u16_v("V31Unbalance", 30087))
        .command(CommandSpec {
            name: "demandReset",
            address: DEMAND_RESET_ADDRESS,
            pulse: u32_to_registers(DEMAND_RESET_SENTINEL).to_vec(),
        })
}

fn feeder_table(n: u16) -> RegisterTable {
    let base = 30080 + u32::from(n) * 40;
    let field = |name, offset: u32, wire, converter| {
        FieldSpec::new(name, base + offset, wire, converter)
    };

    RegisterTable::new(vec![AddressRange::new(base, 40)])
        .field(
            field("type", 0, WireType::U16, Converter::FEEDER_TYPE)
                .with_emit(EmitPolicy::on_change(DEFAULT_CHANGE_DELTA)),
        )
        .field(field("leakageCurrent", 1, WireType::U16, HUNDREDTHS))
        .field(field("current", 2, WireType::U32, HUNDREDTHS))
        .field(field("power", 4, WireType::I32, HUNDREDTHS))
        .field(field("VAR", 6, WireType::I32, Converter::Raw))
        .field(field("VA", 8, WireType::U32, Converter::Raw))
        .field(field("PFAverage", 10, WireType::I16, HUNDREDTHS))
        .field(field("currentUnbalance", 12, WireType::U16, HUNDREDTHS))
        .field(field("THDAverage", 13, WireType::U16, HUNDREDTHS))
        .field(field("L1Current", 16, WireType::U32, HUNDREDTHS))
        .field(field("L1Power", 18, WireType::I32, HUNDREDTHS))
        .field(field("L1Phase", 20, WireType::U16, HUNDREDTHS))
        .field(field("L1PowerFactor", 21, WireType::I16, HUNDREDTHS))
        .field(field("L1PowerTHD", 22, WireType::U16, HUNDREDTHS))
        .field(field("L2Current", 24, WireType::U32, HUNDREDTHS))
        .field(field("L2Power", 26, WireType::I32, HUNDREDTHS))
        .field(field("L2Phase", 28, WireType::U16, HUNDREDTHS))
        .field(field("L2PowerFactor", 29, WireType::I16, HUNDREDTHS))
        .field(field("L2PowerTHD", 30, WireType::U16, HUNDREDTHS))
        .field(field("L3Current", 32, WireType::U32, HUNDREDTHS))
        .field(field("L3Power", 34, WireType::I32, HUNDREDTHS))
        .field(field("L3Phase", 36, WireType::U16, HUNDREDTHS))
        .field(field("L3PowerFactor", 37, WireType::I16, HUNDREDTHS))
        .field(field("L3PowerTHD", 38, WireType::U16, HUNDREDTHS))
}

fn compact_feeder_table(n: u16) -> RegisterTable {
    let k = u32::from(n.saturating_sub(1));
    let block = 32420 + k * 64;
    let leakage = EmitPolicy::batched(DEFAULT_CHANGE_DELTA, DEFAULT_FLUSH_SIZE);

    RegisterTable::new(vec![
        AddressRange::new(block, 64),
        AddressRange::new(36000 + k * 34, 34),
        AddressRange::new(38000 + k * 18, 18),
    ])
    .field(
        FieldSpec::new("type", block, WireType::U16, Converter::FEEDER_TYPE)
            .with_emit(EmitPolicy::on_change(DEFAULT_CHANGE_DELTA)),
    )
    .field(FieldSpec::new("leakageCurrent", block + 3, WireType::U32, TENTHS).with_emit(leakage))
    .field(
        FieldSpec::new("lGCLeakageCurrent", block + 14, WireType::U16, TENTHS)
            .with_emit(leakage),
    )
    .field(
        FieldSpec::new("lGRLeakageCurrent", block + 15, WireType::U16, TENTHS)
            .with_emit(leakage),
    )
}

fn direct_table() -> RegisterTable {
    let float = |name, address| FieldSpec::new(name, address, WireType::F32, Converter::Raw);
    let count = |name, address| FieldSpec::new(name, address, WireType::U32, Converter::Raw);

    RegisterTable::new(vec![
        AddressRange::new(40015, 42),
        AddressRange::new(40225, 2),
    ])
    .field(float("VOLT_A", 40015))
    .field(float("VOLT_B", 40017))
    .field(float("VOLT_C", 40019))
    .field(float("CURR_A", 40021))
    .field(float("CURR_B", 40023))
    .field(float("CURR_C", 40025))
    .field(float("CURR_G", 40027))
    .field(float("IMBALANCE_VOLT", 40029))
    .field(float("IMBALANCE_CURR", 40031))
    .field(count("TOTAL_RUNNING_TIME", 40033))
    .field(count("RUNNING_TIME", 40035))
    .field(count("TOTAL_WATTHR", 40037))
    .field(float("ACTIVE_POWER", 40049))
    .field(float("REACTIVE_POWER", 40051))
    .field(float("FREQ", 40053))
    .field(float("PF", 40055))
    .field(count("RUNS", 40225))
}
