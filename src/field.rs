//! Run-time state of a decoded field
//!
//! Each [`FieldState`] keeps the latest value, a FIFO history capped at
//! [`MAX_HISTORY`] entries and the consumers subscribed to it. A history point
//! leaves the field exactly once: either in a batch pushed to a subscriber or
//! in a host pull, never both.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::constants::MAX_HISTORY;
use crate::emit::{EmitPolicy, EmitTracker, Emission};
use crate::notify::{Consumer, EventKind, Notification, Status};
use crate::value::FieldValue;

/// One decoded value with its timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: FieldValue,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: FieldValue, time: DateTime<Utc>) -> Self {
        Self { value, time }
    }

    pub fn now(value: FieldValue) -> Self {
        Self::new(value, Utc::now())
    }
}

#[derive(Debug)]
struct Subscriber {
    consumer: Consumer,
    policy: EmitPolicy,
    tracker: EmitTracker,
    tx: mpsc::UnboundedSender<Notification>,
}

/// Latest value, bounded history and subscribers of one field
#[derive(Debug, Default)]
pub struct FieldState {
    value: Option<FieldValue>,
    time: Option<DateTime<Utc>>,
    history: VecDeque<Sample>,
    registered: bool,
    subscribers: Vec<Subscriber>,
}

impl FieldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    /// Latest value with its timestamp.
    pub fn latest(&self) -> Option<Sample> {
        match (&self.value, self.time) {
            (Some(value), Some(time)) => Some(Sample::new(value.clone(), time)),
            _ => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn subscribe(
        &mut self,
        consumer: Consumer,
        policy: EmitPolicy,
        tx: mpsc::UnboundedSender<Notification>,
    ) {
        self.registered = true;
        self.subscribers.push(Subscriber {
            consumer,
            policy,
            tracker: EmitTracker::new(),
            tx,
        });
    }

    /// Store a new sample, evicting the oldest history entry when full.
    pub fn push(&mut self, sample: Sample) {
        self.value = Some(sample.value.clone());
        self.time = Some(sample.time);
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    /// Take the accumulated history, leaving it empty.
    ///
    /// Samples that batched subscribers were still holding are dropped from
    /// their next flush.
    pub fn drain(&mut self) -> Vec<Sample> {
        for sub in &mut self.subscribers {
            sub.tracker.discard_pending();
        }
        std::mem::take(&mut self.history).into()
    }

    /// Push `sample` to every subscriber whose policy releases it.
    ///
    /// A batch flush consumes the history it carried. Subscribers whose
    /// receiver is gone are dropped.
    pub(crate) fn deliver(&mut self, sample: &Sample) {
        let mut flushed = false;
        self.subscribers.retain_mut(|sub| {
            let notification = match sub.tracker.record(&sub.policy, sample) {
                None => return !sub.tx.is_closed(),
                Some(Emission::Sample(s)) => Notification::sample(
                    sub.policy.event_kind(),
                    Status::On,
                    &sub.consumer,
                    Some(&s),
                ),
                Some(Emission::Batch(values)) => {
                    flushed = true;
                    Notification::batch(sub.policy.event_kind(), &sub.consumer, values)
                }
            };
            sub.tx.send(notification).is_ok()
        });
        if flushed {
            self.history.clear();
        }
    }

    /// Push an error payload to every subscriber.
    pub(crate) fn deliver_error(&mut self, message: &str) {
        self.subscribers
            .retain(|sub| sub.tx.send(Notification::error(&sub.consumer, message)).is_ok());
    }
}

/// Event name a host uses when it pulls a field's state.
pub fn pull_event(policy: &EmitPolicy) -> EventKind {
    if policy.is_batched() {
        EventKind::DataArray
    } else {
        EventKind::Data
    }
}
