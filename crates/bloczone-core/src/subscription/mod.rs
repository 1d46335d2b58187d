//! Subscriptions: who watches which keys, and delivering notifications to them.

pub mod dispatch;
pub mod registry;

pub use dispatch::{DispatchReport, NotificationDispatcher};
pub use registry::{Listener, Registration, SubscriptionRegistry, listener};
