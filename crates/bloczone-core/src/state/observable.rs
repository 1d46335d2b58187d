//! ObservableState - read/write を仲介する record
//!
//! - `read(key)`: 値を返し、effect 実行中なら依存関係を記録
//! - `write(key, value)`: 旧値と比較し、変化したときだけフィールドを更新してから通知
//!
//! 通知先は呼び出し側が渡す（ObservableState 自身は subscription を知らない）。

use serde_json::Value;
use tracing::trace;

use super::tracker::DependencyTracker;
use crate::domain::record::WeakObserved;
use crate::domain::{ObservedValue, Record};
use crate::error::StoreError;

pub struct ObservableState {
    backing: ObservedValue,
    original: WeakObserved,
    tracker: DependencyTracker,
}

impl ObservableState {
    /// Fails with `InvalidState` unless `initial` is a JSON object.
    pub fn new(initial: Value) -> Result<Self, StoreError> {
        ObservedValue::new(initial).map(Self::from_observed)
    }

    /// Observe an existing record without copying it.
    pub fn from_observed(backing: ObservedValue) -> Self {
        let original = backing.downgrade();
        Self {
            backing,
            original,
            tracker: DependencyTracker::new(),
        }
    }

    /// Tracked read.
    pub fn read(&self, key: &str) -> Option<Value> {
        if self.tracker.track(key) {
            trace!(key, "dependency recorded");
        }
        self.backing.get(key)
    }

    /// Write `value` under `key`; `notify` runs only if the value changed,
    /// after the field has been updated.
    pub fn write<F>(&self, key: &str, value: Value, notify: F) -> bool
    where
        F: FnOnce(&str, &ObservedValue),
    {
        let changed = self.backing.replace_if_changed(key, value);
        if changed {
            notify(key, &self.backing);
        }
        changed
    }

    /// Apply every field of `partial` without notifying.
    ///
    /// Returns the keys whose value actually changed, in `partial` order.
    pub fn apply_silently(&self, partial: Record) -> Vec<String> {
        partial
            .into_iter()
            .filter_map(|(key, value)| self.backing.replace_if_changed(&key, value).then_some(key))
            .collect()
    }

    pub fn get_state(&self) -> ObservedValue {
        self.backing.clone()
    }

    /// The exact record this state was built around.
    pub fn get_raw_state(&self) -> Result<ObservedValue, StoreError> {
        match self.original.upgrade() {
            Some(original) if original.ptr_eq(&self.backing) => Ok(original),
            Some(_) => Err(StoreError::InvariantViolation(
                "backing record was replaced".to_string(),
            )),
            None => Err(StoreError::InvariantViolation(
                "original record not found".to_string(),
            )),
        }
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }
}
