//! # Emit Policies
//!
//! Decide, per field and per consumer, when a decoded sample is pushed out.
//!
//! ## How It Works
//!
//! | Policy | Event | Releases when |
//! |--------|-------|---------------|
//! | `Always` | `data` | every decode |
//! | `OnChange` | `change` | value moved by `delta`, or `max_pending` samples were held back |
//! | `Batched` | `change_array` | value moved by `delta`, or `flush_size` samples accumulated |
//!
//! The first sample after registration is always released. A zero
//! `max_pending`/`flush_size` disables the size trigger.
//!
//! ## Example
//!
//! ```rust
//! use voltage_poller::{EmitPolicy, EmitTracker, Emission, FieldValue, Sample};
//!
//! let policy = EmitPolicy::batched(1.0, 3);
//! let mut tracker = EmitTracker::new();
//!
//! // First sample flushes immediately
//! assert!(tracker.record(&policy, &Sample::now(FieldValue::Number(0.10))).is_some());
//!
//! // Small moves are held until the buffer fills
//! assert!(tracker.record(&policy, &Sample::now(FieldValue::Number(0.12))).is_none());
//! assert!(tracker.record(&policy, &Sample::now(FieldValue::Number(0.11))).is_none());
//! match tracker.record(&policy, &Sample::now(FieldValue::Number(0.13))) {
//!     Some(Emission::Batch(samples)) => assert_eq!(samples.len(), 3),
//!     other => panic!("expected a batch, got {:?}", other),
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::MAX_HISTORY;
use crate::field::Sample;
use crate::notify::EventKind;
use crate::value::FieldValue;

/// Default change threshold, in converted units.
pub const DEFAULT_CHANGE_DELTA: f64 = 1.0;

/// Default number of samples accumulated before a batch is forced out.
pub const DEFAULT_FLUSH_SIZE: usize = 6;

/// Per-field emission rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EmitPolicy {
    #[default]
    Always,
    OnChange { delta: f64, max_pending: usize },
    Batched { delta: f64, flush_size: usize },
}

impl EmitPolicy {
    pub fn on_change(delta: f64) -> Self {
        EmitPolicy::OnChange {
            delta,
            max_pending: 0,
        }
    }

    pub fn batched(delta: f64, flush_size: usize) -> Self {
        EmitPolicy::Batched { delta, flush_size }
    }

    /// Event name used for notifications released under this policy.
    pub fn event_kind(&self) -> EventKind {
        match self {
            EmitPolicy::Always => EventKind::Data,
            EmitPolicy::OnChange { .. } => EventKind::Change,
            EmitPolicy::Batched { .. } => EventKind::ChangeArray,
        }
    }

    pub fn is_batched(&self) -> bool {
        matches!(self, EmitPolicy::Batched { .. })
    }
}

/// What a tracker released for one sample
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Sample(Sample),
    Batch(Vec<Sample>),
}

/// Per-subscriber emission state.
#[derive(Debug, Default)]
pub struct EmitTracker {
    last_emitted: Option<FieldValue>,
    /// Samples decoded since the last release.
    held: usize,
    /// Samples awaiting a batch flush.
    batch: Vec<Sample>,
}

impl EmitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples held back since the last release.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.held
    }

    fn crossed(&self, value: &FieldValue, delta: f64) -> bool {
        match &self.last_emitted {
            None => true,
            Some(previous) => value.differs_by(previous, delta),
        }
    }

    fn release(&mut self, value: &FieldValue) {
        self.last_emitted = Some(value.clone());
        self.held = 0;
    }

    /// Feed one decoded sample and return what should be pushed, if anything.
    pub fn record(&mut self, policy: &EmitPolicy, sample: &Sample) -> Option<Emission> {
        match *policy {
            EmitPolicy::Always => {
                self.release(&sample.value);
                Some(Emission::Sample(sample.clone()))
            }
            EmitPolicy::OnChange { delta, max_pending } => {
                self.held += 1;
                let full = max_pending > 0 && self.held >= max_pending;
                if self.crossed(&sample.value, delta) || full {
                    self.release(&sample.value);
                    Some(Emission::Sample(sample.clone()))
                } else {
                    None
                }
            }
            EmitPolicy::Batched { delta, flush_size } => {
                if self.batch.len() == MAX_HISTORY {
                    self.batch.remove(0);
                }
                self.batch.push(sample.clone());
                self.held += 1;
                let full = flush_size > 0 && self.batch.len() >= flush_size;
                if self.crossed(&sample.value, delta) || full {
                    self.release(&sample.value);
                    Some(Emission::Batch(std::mem::take(&mut self.batch)))
                } else {
                    None
                }
            }
        }
    }

    /// Drop samples awaiting a batch flush, e.g. after a host pulled them.
    ///
    /// The change baseline is kept, so the next flush is still measured
    /// against the last released value.
    pub fn discard_pending(&mut self) {
        self.held = 0;
        self.batch.clear();
    }

    /// Forget everything held back.
    pub fn clear(&mut self) {
        self.last_emitted = None;
        self.held = 0;
        self.batch.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f64) -> Sample {
        Sample::now(FieldValue::Number(v))
    }

    #[test]
    fn test_always_emits_every_sample() {
        let mut tracker = EmitTracker::new();
        for v in [1.0, 1.0, 1.0] {
            assert!(matches!(
                tracker.record(&EmitPolicy::Always, &sample(v)),
                Some(Emission::Sample(_))
            ));
        }
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_on_change_threshold() {
        let policy = EmitPolicy::on_change(1.0);
        let mut tracker = EmitTracker::new();

        assert!(tracker.record(&policy, &sample(10.0)).is_some());
        assert!(tracker.record(&policy, &sample(10.4)).is_none());
        assert!(tracker.record(&policy, &sample(10.9)).is_none());
        assert_eq!(tracker.pending_count(), 2);

        // Measured against the last released value, not the last sample
        assert!(tracker.record(&policy, &sample(11.0)).is_some());
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_on_change_max_pending_forces_release() {
        let policy = EmitPolicy::OnChange {
            delta: 100.0,
            max_pending: 3,
        };
        let mut tracker = EmitTracker::new();

        assert!(tracker.record(&policy, &sample(1.0)).is_some());
        assert!(tracker.record(&policy, &sample(1.0)).is_none());
        assert!(tracker.record(&policy, &sample(1.0)).is_none());
        assert!(tracker.record(&policy, &sample(1.0)).is_some());
    }

    #[test]
    fn test_on_change_labels() {
        let policy = EmitPolicy::on_change(DEFAULT_CHANGE_DELTA);
        let mut tracker = EmitTracker::new();
        let label = |s: &str| Sample::now(FieldValue::from(s));

        assert!(tracker.record(&policy, &label("3P4W")).is_some());
        assert!(tracker.record(&policy, &label("3P4W")).is_none());
        assert!(tracker.record(&policy, &label("ZCT")).is_some());
    }

    #[test]
    fn test_batched_flush_on_size() {
        let policy = EmitPolicy::batched(1.0, DEFAULT_FLUSH_SIZE);
        let mut tracker = EmitTracker::new();

        assert!(matches!(
            tracker.record(&policy, &sample(0.5)),
            Some(Emission::Batch(ref s)) if s.len() == 1
        ));

        for _ in 0..DEFAULT_FLUSH_SIZE - 1 {
            assert!(tracker.record(&policy, &sample(0.6)).is_none());
        }
        match tracker.record(&policy, &sample(0.6)) {
            Some(Emission::Batch(samples)) => assert_eq!(samples.len(), DEFAULT_FLUSH_SIZE),
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_batched_flush_on_delta() {
        let policy = EmitPolicy::batched(1.0, 30);
        let mut tracker = EmitTracker::new();

        tracker.record(&policy, &sample(0.0));
        assert!(tracker.record(&policy, &sample(0.2)).is_none());
        match tracker.record(&policy, &sample(1.5)) {
            Some(Emission::Batch(samples)) => {
                assert_eq!(samples.len(), 2);
                assert_eq!(samples[1].value, FieldValue::Number(1.5));
            }
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_discard_pending_keeps_baseline() {
        let policy = EmitPolicy::batched(1.0, 3);
        let mut tracker = EmitTracker::new();
        tracker.record(&policy, &sample(0.0));
        tracker.record(&policy, &sample(0.1));
        tracker.record(&policy, &sample(0.2));

        tracker.discard_pending();
        assert_eq!(tracker.pending_count(), 0);
        assert!(tracker.record(&policy, &sample(0.3)).is_none());
        match tracker.record(&policy, &sample(1.0)) {
            Some(Emission::Batch(samples)) => {
                let values: Vec<_> = samples.into_iter().map(|s| s.value).collect();
                assert_eq!(values, vec![FieldValue::Number(0.3), FieldValue::Number(1.0)]);
            }
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_resets_first_sample_rule() {
        let policy = EmitPolicy::on_change(1.0);
        let mut tracker = EmitTracker::new();
        tracker.record(&policy, &sample(5.0));
        assert!(tracker.record(&policy, &sample(5.0)).is_none());

        tracker.clear();
        assert!(tracker.record(&policy, &sample(5.0)).is_some());
    }

    #[test]
    fn test_policy_json() {
        let policy: EmitPolicy =
            serde_json::from_str(r#"{"mode":"batched","delta":1.0,"flush_size":30}"#).unwrap();
        assert_eq!(policy, EmitPolicy::batched(1.0, 30));
        assert_eq!(policy.event_kind(), EventKind::ChangeArray);

        let always: EmitPolicy = serde_json::from_str(r#"{"mode":"always"}"#).unwrap();
        assert_eq!(always, EmitPolicy::Always);
    }
}
