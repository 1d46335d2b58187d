use thiserror::Error;

use crate::domain::ObserverId;

/// Error returned by a listener. Logged and isolated per observer.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bloc state must be an object, got {0}")]
    InvalidState(&'static str),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("unknown feature `{name}`, expected one of: {valid}")]
    UnknownFeature { name: String, valid: String },

    #[error("update `{action}` aborted by middleware")]
    MiddlewareAborted {
        action: String,
        #[source]
        source: MiddlewareError,
    },

    /// Only returned by [`DependencyTracker::begin`](crate::state::DependencyTracker::begin)
    /// and `run` when the tracker is driven directly. `Container` serializes its
    /// seeding effects, so subscribing never produces it.
    #[error("dependency tracking effect already active (requested for {0})")]
    EffectReentered(ObserverId),
}

/// A middleware refused the update. The commit step never runs.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MiddlewareError(String);

impl MiddlewareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}
