//! The observed record and its shared handle.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

use crate::error::StoreError;
use crate::sync;

/// A plain record: property name -> value.
pub type Record = serde_json::Map<String, Value>;

/// Coerce a JSON value into a record.
///
/// Anything other than an object (including `null`) is rejected with
/// `StoreError::InvalidState`.
pub fn into_record(value: Value) -> Result<Record, StoreError> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(StoreError::InvalidState(value_kind(&other))),
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Live handle to the record backing a container.
///
/// Cloning the handle does not copy the record: every clone refers to the
/// same object, and `ptr_eq` tells whether two handles do. The public API is
/// read-only. Writes go through the container so they are compared and
/// notified.
#[derive(Clone)]
pub struct ObservedValue {
    inner: Arc<RwLock<Record>>,
}

impl ObservedValue {
    /// Wrap an initial value. Fails unless it is a JSON object.
    pub fn new(initial: Value) -> Result<Self, StoreError> {
        into_record(initial).map(Self::from_record)
    }

    pub fn from_record(record: Record) -> Self {
        Self {
            inner: Arc::new(RwLock::new(record)),
        }
    }

    /// Untracked read of one property.
    pub fn get(&self, key: &str) -> Option<Value> {
        sync::read(&self.inner).get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        sync::read(&self.inner).contains_key(key)
    }

    /// Property names present right now.
    pub fn keys(&self) -> Vec<String> {
        sync::read(&self.inner).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        sync::read(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        sync::read(&self.inner).is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Record {
        sync::read(&self.inner).clone()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.snapshot())
    }

    /// `true` when both handles refer to the same record.
    pub fn ptr_eq(&self, other: &ObservedValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakObserved {
        WeakObserved {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Store `value` under `key` unless it is equal to the current one.
    ///
    /// Returns `true` when the field changed. The write lock is released
    /// before returning, so callers may notify right after.
    pub(crate) fn replace_if_changed(&self, key: &str, value: Value) -> bool {
        let mut record = sync::write(&self.inner);
        if record.get(key) == Some(&value) {
            return false;
        }
        record.insert(key.to_string(), value);
        true
    }
}

impl fmt::Debug for ObservedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObservedValue").field(&*sync::read(&self.inner)).finish()
    }
}

/// Non-owning handle used to check that the backing record is still the original.
pub(crate) struct WeakObserved {
    inner: Weak<RwLock<Record>>,
}

impl WeakObserved {
    pub(crate) fn upgrade(&self) -> Option<ObservedValue> {
        self.inner.upgrade().map(|inner| ObservedValue { inner })
    }
}
