//! Consumer handles and the notifications pushed to them
//!
//! Payloads serialize to the shapes the host framework expects:
//!
//! ```text
//! data / change              { "status": "on", "id": ..., "result": {dataType: value}, "time": {dataType: ms} }
//! data_array / change_array  { "status": "on", "id": ..., "values": [{"value": .., "time": ms}, ..] }
//! error                      { "status": "error", "id": ..., "message": ... }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::emit::EmitPolicy;
use crate::field::Sample;
use crate::value::FieldValue;

/// A host sensor or actuator bound to one field of a logical device
#[derive(Debug, Clone, PartialEq)]
pub struct Consumer {
    /// Full host identifier, echoed in every payload
    pub id: String,
    /// Field (or command) name in the device's register table
    pub field: String,
    /// Key used in `result`/`time` maps, e.g. `"current"`
    pub data_type: String,
    /// Overrides the field's default emit policy
    pub emit: Option<EmitPolicy>,
}

impl Consumer {
    pub fn new(
        id: impl Into<String>,
        field: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            field: field.into(),
            data_type: data_type.into(),
            emit: None,
        }
    }

    pub fn with_emit(mut self, emit: EmitPolicy) -> Self {
        self.emit = Some(emit);
        self
    }
}

/// Notification event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Data,
    DataArray,
    Change,
    ChangeArray,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Data => "data",
            EventKind::DataArray => "data_array",
            EventKind::Change => "change",
            EventKind::ChangeArray => "change_array",
        }
    }
}

/// Payload `status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    On,
    Off,
    Error,
}

/// Notification body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Sample {
        status: Status,
        id: String,
        result: BTreeMap<String, FieldValue>,
        time: BTreeMap<String, i64>,
    },
    Batch {
        status: Status,
        id: String,
        values: Vec<Sample>,
    },
    Error {
        status: Status,
        id: String,
        message: String,
    },
}

/// An event pushed to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event: EventKind,
    pub payload: Payload,
}

impl Notification {
    /// Single-value notification. `sample` of `None` yields empty maps.
    pub fn sample(
        event: EventKind,
        status: Status,
        consumer: &Consumer,
        sample: Option<&Sample>,
    ) -> Self {
        let mut result = BTreeMap::new();
        let mut time = BTreeMap::new();
        if let Some(sample) = sample {
            result.insert(consumer.data_type.clone(), sample.value.clone());
            time.insert(consumer.data_type.clone(), sample.time.timestamp_millis());
        }
        Self {
            event,
            payload: Payload::Sample {
                status,
                id: consumer.id.clone(),
                result,
                time,
            },
        }
    }

    pub fn batch(event: EventKind, consumer: &Consumer, values: Vec<Sample>) -> Self {
        Self {
            event,
            payload: Payload::Batch {
                status: Status::On,
                id: consumer.id.clone(),
                values,
            },
        }
    }

    pub fn error(consumer: &Consumer, message: impl Into<String>) -> Self {
        Self {
            event: EventKind::Data,
            payload: Payload::Error {
                status: Status::Error,
                id: consumer.id.clone(),
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> Status {
        match &self.payload {
            Payload::Sample { status, .. }
            | Payload::Batch { status, .. }
            | Payload::Error { status, .. } => *status,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Receiving end of a field registration.
///
/// Dropping it detaches the consumer; the device prunes the closed sender on
/// its next delivery.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<Notification>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn consumer() -> Consumer {
        Consumer::new("gw1-10.0.0.5:502:1-leakageCurrent", "leakageCurrent", "current")
    }

    fn at(ms: i64, value: f64) -> Sample {
        Sample {
            value: FieldValue::Number(value),
            time: Utc.timestamp_millis_opt(ms).unwrap(),
        }
    }

    #[test]
    fn test_sample_shape() {
        let sample = at(1000, 10.0);
        let n = Notification::sample(EventKind::Data, Status::On, &consumer(), Some(&sample));
        assert_eq!(
            n.to_json(),
            json!({
                "status": "on",
                "id": "gw1-10.0.0.5:502:1-leakageCurrent",
                "result": {"current": 10.0},
                "time": {"current": 1000}
            })
        );
    }

    #[test]
    fn test_batch_shape() {
        let values = vec![at(1, 0.5), at(2, 0.6)];
        let n = Notification::batch(EventKind::DataArray, &consumer(), values);
        assert_eq!(n.event.as_str(), "data_array");
        assert_eq!(
            n.to_json(),
            json!({
                "status": "on",
                "id": "gw1-10.0.0.5:502:1-leakageCurrent",
                "values": [{"value": 0.5, "time": 1}, {"value": 0.6, "time": 2}]
            })
        );
    }

    #[test]
    fn test_error_shape() {
        let n = Notification::error(&consumer(), "Not connected");
        assert_eq!(n.status(), Status::Error);
        assert_eq!(
            n.to_json(),
            json!({
                "status": "error",
                "id": "gw1-10.0.0.5:502:1-leakageCurrent",
                "message": "Not connected"
            })
        );
    }

    #[test]
    fn test_off_without_sample() {
        let n = Notification::sample(EventKind::Data, Status::Off, &consumer(), None);
        assert_eq!(n.to_json()["status"], "off");
        assert_eq!(n.to_json()["result"], json!({}));
    }

    #[test]
    fn test_dropped_subscription_closes_sender() {
        let (tx, sub) = Subscription::channel();
        drop(sub);
        assert!(tx
            .send(Notification::error(&consumer(), "late"))
            .is_err());
    }
}
