//! Observable state and dependency tracking.

pub mod observable;
pub mod tracker;

pub use observable::ObservableState;
pub use tracker::{DependencyTracker, EffectGuard};
