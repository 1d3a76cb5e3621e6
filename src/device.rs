//! Logical devices sharing one physical meter connection
//!
//! A [`LogicalDevice`] owns the register table and field state of one
//! sub-device (the base meter or a numbered feeder). The connection worker
//! hands it every completed read for its ranges; it decodes the block, updates
//! field history and pushes notifications to subscribers according to each
//! subscriber's emit policy.
//!
//! All decoding runs on the connection worker, one read at a time, so field
//! state is only ever mutated by one decode at once. Host calls
//! ([`LogicalDevice::value`], [`LogicalDevice::values`]) take the same lock and
//! therefore see either the state before or after a decode, never a partial one.

use std::sync::Weak;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::codec::decode_field;
use crate::connection::{PhysicalConnection, WriteStep};
use crate::emit::EmitPolicy;
use crate::error::{ModbusError, ModbusResult};
use crate::field::{pull_event, FieldState, Sample};
use crate::models::DeviceModel;
use crate::notify::{Consumer, EventKind, Notification, Status, Subscription};
use crate::register::{AddressRange, RegisterTable};
use crate::value::FieldValue;

/// Value reported for write-only command endpoints
pub const COMMAND_IDLE: &str = "off";

struct CommandSubscriber {
    consumer: Consumer,
    tx: mpsc::UnboundedSender<Notification>,
}

/// One sub-device on a physical meter
pub struct LogicalDevice {
    model: DeviceModel,
    table: RegisterTable,
    fields: Mutex<Vec<FieldState>>,
    commands: Mutex<Vec<CommandSubscriber>>,
    connection: Weak<PhysicalConnection>,
}

impl std::fmt::Debug for LogicalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalDevice")
            .field("model", &self.model)
            .field("ranges", &self.table.ranges)
            .finish()
    }
}

impl LogicalDevice {
    pub(crate) fn new(
        model: DeviceModel,
        connection: Weak<PhysicalConnection>,
    ) -> ModbusResult<Self> {
        let table = model.table()?;
        let fields = table.fields.iter().map(|_| FieldState::new()).collect();
        Ok(Self {
            model,
            table,
            fields: Mutex::new(fields),
            commands: Mutex::new(Vec::new()),
            connection,
        })
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn sub_id(&self) -> u16 {
        self.model.sub_id()
    }

    pub fn ranges(&self) -> &[AddressRange] {
        &self.table.ranges
    }

    pub fn table(&self) -> &RegisterTable {
        &self.table
    }

    /// Whether any field has a consumer, i.e. the device needs polling.
    pub fn has_registered_fields(&self) -> bool {
        self.fields.lock().iter().any(FieldState::is_registered)
    }

    fn is_command(&self, name: &str) -> bool {
        self.table.find_command(name).is_some()
    }

    fn unknown(&self, consumer: &Consumer, operation: &str) -> ModbusError {
        error!(
            "{} of unknown field '{}' on {} {} (consumer {})",
            operation,
            consumer.field,
            self.model.name(),
            self.sub_id(),
            consumer.id
        );
        ModbusError::unknown_field(consumer.field.clone())
    }

    fn policy_for(&self, consumer: &Consumer, index: usize) -> EmitPolicy {
        consumer.emit.unwrap_or(self.table.fields[index].emit)
    }

    /// Bind a consumer to a field and make sure the meter is being polled.
    ///
    /// Command endpoints register without starting the poll loop. An unknown
    /// field is logged and rejected with no state change.
    pub fn register_field(&self, consumer: Consumer) -> ModbusResult<Subscription> {
        if let Some(index) = self.table.field_index(&consumer.field) {
            let policy = self.policy_for(&consumer, index);
            let (tx, subscription) = Subscription::channel();
            debug!(
                "Registering {} on {} {} with {:?}",
                consumer.field,
                self.model.name(),
                self.sub_id(),
                policy
            );
            self.fields.lock()[index].subscribe(consumer, policy, tx);

            match self.connection.upgrade() {
                Some(connection) => connection.start(),
                None => warn!("Field registered on a device whose connection is gone"),
            }
            return Ok(subscription);
        }

        if self.is_command(&consumer.field) {
            let (tx, subscription) = Subscription::channel();
            self.commands.lock().push(CommandSubscriber { consumer, tx });
            return Ok(subscription);
        }

        Err(self.unknown(&consumer, "Registration"))
    }

    /// Current value of the consumer's field.
    ///
    /// Command endpoints always report [`COMMAND_IDLE`]; unknown fields log an
    /// error and return `None`.
    pub fn value(&self, consumer: &Consumer) -> Option<FieldValue> {
        if let Some(index) = self.table.field_index(&consumer.field) {
            return self.fields.lock()[index].value().cloned();
        }
        if self.is_command(&consumer.field) {
            return Some(FieldValue::from(COMMAND_IDLE));
        }
        self.unknown(consumer, "Read");
        None
    }

    /// Drain the field's history. A second call right after returns an empty list.
    pub fn values(&self, consumer: &Consumer) -> Option<Vec<Sample>> {
        match self.table.field_index(&consumer.field) {
            Some(index) => Some(self.fields.lock()[index].drain()),
            None => {
                self.unknown(consumer, "History read");
                None
            }
        }
    }

    /// Build the notification a host emits when it pulls this consumer's state.
    pub fn poll_notification(&self, consumer: &Consumer) -> Notification {
        let Some(index) = self.table.field_index(&consumer.field) else {
            if self.is_command(&consumer.field) {
                return Notification::sample(EventKind::Data, Status::Off, consumer, None);
            }
            let err = self.unknown(consumer, "Pull");
            return Notification::error(consumer, err.to_string());
        };

        let policy = self.policy_for(consumer, index);
        let mut fields = self.fields.lock();
        match pull_event(&policy) {
            EventKind::DataArray => {
                Notification::batch(EventKind::DataArray, consumer, fields[index].drain())
            }
            event => {
                Notification::sample(event, Status::On, consumer, fields[index].latest().as_ref())
            }
        }
    }

    /// Decode a completed read of `range` into every field it covers.
    ///
    /// Fields outside `range` are left untouched.
    pub(crate) fn on_read(&self, range: AddressRange, registers: &[u16]) {
        let now = Utc::now();
        let mut fields = self.fields.lock();
        for (index, offset) in self.table.fields_in(range) {
            let spec = &self.table.fields[index];
            let sample = Sample::new(
                decode_field(registers, offset, spec.wire, spec.converter),
                now,
            );
            let state = &mut fields[index];
            state.push(sample.clone());
            state.deliver(&sample);
        }
    }

    /// Report a failed read of `range` to the subscribers of the fields it covers.
    pub(crate) fn on_read_error(&self, range: AddressRange, err: &ModbusError) {
        let message = err.to_string();
        let mut fields = self.fields.lock();
        for (index, _) in self.table.fields_in(range) {
            fields[index].deliver_error(&message);
        }
    }

    /// Run a command endpoint, e.g. `demandReset`.
    ///
    /// `settings` is the host's JSON settings document; it must parse before
    /// anything is written. The pulse is written and then cleared as one write
    /// task, and command subscribers are told the outcome.
    pub async fn command(&self, name: &str, settings: Option<&str>) -> ModbusResult<()> {
        if let Some(settings) = settings {
            let parsed: serde_json::Value = serde_json::from_str(settings)?;
            debug!("Command {} settings: {}", name, parsed);
        }

        let spec = self.table.find_command(name).ok_or_else(|| {
            error!("Unknown command '{}' on {} {}", name, self.model.name(), self.sub_id());
            ModbusError::unknown_field(name)
        })?;
        let connection = self.connection.upgrade().ok_or(ModbusError::NotConnected)?;

        let steps = vec![
            WriteStep::new(spec.address, spec.pulse.clone()),
            WriteStep::new(spec.address, vec![0; spec.pulse.len()]),
        ];
        let result = connection.submit_write(steps).await;

        let mut subscribers = self.commands.lock();
        subscribers.retain(|sub| {
            if sub.consumer.field != name {
                return !sub.tx.is_closed();
            }
            let notification = match &result {
                Ok(()) => Notification::sample(EventKind::Data, Status::On, &sub.consumer, None),
                Err(err) => Notification::error(&sub.consumer, err.to_string()),
            };
            sub.tx.send(notification).is_ok()
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::u32_to_registers;
    use crate::notify::Payload;

    fn detached(model: DeviceModel) -> LogicalDevice {
        LogicalDevice::new(model, Weak::new()).unwrap()
    }

    fn base_block() -> Vec<u16> {
        let mut block = vec![0u16; 104];
        block[1] = 253; // temperature 25.3
        block[2] = 6000; // frequency 60.00
        let [hi, lo] = u32_to_registers(22_050);
        block[70] = hi; // V1 220.50
        block[71] = lo;
        block
    }

    #[test]
    fn test_decode_base_block() {
        let device = detached(DeviceModel::Base);
        device.on_read(AddressRange::new(30000, 104), &base_block());

        let get = |field: &str| device.value(&Consumer::new("c", field, "x"));
        assert_eq!(get("temperature"), Some(FieldValue::Number(25.3)));
        assert_eq!(get("frequency"), Some(FieldValue::Number(60.0)));
        assert_eq!(get("V1"), Some(FieldValue::Number(220.5)));
        assert_eq!(get("V2"), Some(FieldValue::Number(0.0)));
    }

    #[test]
    fn test_short_block_degrades_to_zero() {
        let device = detached(DeviceModel::Base);
        device.on_read(AddressRange::new(30000, 104), &[0, 253]);

        let get = |field: &str| device.value(&Consumer::new("c", field, "x"));
        assert_eq!(get("temperature"), Some(FieldValue::Number(25.3)));
        assert_eq!(get("V31Unbalance"), Some(FieldValue::Number(0.0)));
    }

    #[test]
    fn test_other_range_leaves_fields_untouched() {
        let device = detached(DeviceModel::CompactFeeder(1));
        device.on_read(AddressRange::new(36000, 34), &[7; 34]);
        assert_eq!(device.value(&Consumer::new("c", "type", "string")), None);
    }

    #[test]
    fn test_unknown_field() {
        let device = detached(DeviceModel::Base);
        let bogus = Consumer::new("c", "bogus", "x");

        assert!(matches!(
            device.register_field(bogus.clone()),
            Err(ModbusError::UnknownField { .. })
        ));
        assert_eq!(device.value(&bogus), None);
        assert_eq!(device.values(&bogus), None);
        assert!(!device.has_registered_fields());

        match device.poll_notification(&bogus).payload {
            Payload::Error { message, .. } => assert_eq!(message, "Unknown field: bogus"),
            other => panic!("expected error payload, got {:?}", other),
        }
    }

    #[test]
    fn test_command_endpoint_reports_idle() {
        let device = detached(DeviceModel::Base);
        let reset = Consumer::new("c", "demandReset", "powerSwitch");

        assert!(device.register_field(reset.clone()).is_ok());
        assert!(!device.has_registered_fields());
        assert_eq!(device.value(&reset), Some(FieldValue::from(COMMAND_IDLE)));
        assert_eq!(device.poll_notification(&reset).status(), Status::Off);
    }

    #[test]
    fn test_values_drain() {
        let device = detached(DeviceModel::CompactFeeder(1));
        let consumer = Consumer::new("c", "lGCLeakageCurrent", "current");
        let range = AddressRange::new(32420, 64);

        let mut block = vec![0u16; 64];
        for raw in [10u16, 11, 12] {
            block[14] = raw;
            device.on_read(range, &block);
        }

        let drained = device.values(&consumer).unwrap();
        let values: Vec<_> = drained.iter().map(|s| s.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                FieldValue::Number(1.0),
                FieldValue::Number(1.1),
                FieldValue::Number(1.2)
            ]
        );
        assert!(device.values(&consumer).unwrap().is_empty());
    }

    #[test]
    fn test_batched_point_is_pushed_or_pulled_once() {
        let device = detached(DeviceModel::CompactFeeder(1));
        let consumer = Consumer::new("c", "lGCLeakageCurrent", "current");
        let mut sub = device.register_field(consumer.clone()).unwrap();
        let range = AddressRange::new(32420, 64);
        let read = |raw: u16| {
            let mut block = vec![0u16; 64];
            block[14] = raw;
            device.on_read(range, &block);
        };
        let numbers = |n: Notification| -> Vec<FieldValue> {
            match n.payload {
                Payload::Batch { values, .. } => values.into_iter().map(|s| s.value).collect(),
                other => panic!("expected batch payload, got {:?}", other),
            }
        };

        read(5);
        let pushed = numbers(sub.try_recv().unwrap());
        assert_eq!(pushed, vec![FieldValue::Number(0.5)]);

        let pulled = device.poll_notification(&consumer);
        assert_eq!(pulled.event, EventKind::DataArray);
        assert!(numbers(pulled).is_empty());

        read(6);
        read(7);
        assert!(sub.try_recv().is_none());
        assert_eq!(
            numbers(device.poll_notification(&consumer)),
            vec![FieldValue::Number(0.6), FieldValue::Number(0.7)]
        );

        // Pulled points stay out of the next pushed batch
        read(25);
        assert_eq!(numbers(sub.try_recv().unwrap()), vec![FieldValue::Number(2.5)]);
        assert!(device.values(&consumer).unwrap().is_empty());
    }

    #[test]
    fn test_subscriber_receives_decoded_sample() {
        let device = detached(DeviceModel::Feeder(1));
        let mut sub = device
            .register_field(Consumer::new("gw-h:502:1-type", "type", "string"))
            .unwrap();
        assert!(device.has_registered_fields());

        let mut block = vec![0u16; 40];
        block[0] = 5;
        device.on_read(AddressRange::new(30120, 40), &block);
        device.on_read(AddressRange::new(30120, 40), &block);

        let first = sub.try_recv().unwrap();
        assert_eq!(first.event, EventKind::Change);
        assert_eq!(first.to_json()["result"]["string"], "3P4W");
        // Unchanged label is held back
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_read_error_reaches_subscribers() {
        let device = detached(DeviceModel::Base);
        let mut sub = device
            .register_field(Consumer::new("c", "V1", "voltage"))
            .unwrap();

        device.on_read_error(AddressRange::new(30000, 104), &ModbusError::NotConnected);
        assert_eq!(sub.try_recv().unwrap().status(), Status::Error);
    }

    #[tokio::test]
    async fn test_command_without_connection() {
        let device = detached(DeviceModel::Base);
        assert!(matches!(
            device.command("demandReset", None).await,
            Err(ModbusError::NotConnected)
        ));
        assert!(matches!(
            device.command("demandReset", Some("{oops")).await,
            Err(ModbusError::Configuration { .. })
        ));
        assert!(matches!(
            device.command("nope", None).await,
            Err(ModbusError::UnknownField { .. })
        ));
    }
}
