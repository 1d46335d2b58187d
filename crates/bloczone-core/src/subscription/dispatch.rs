//! NotificationDispatcher - 変更されたキーの observer に通知
//!
//! # フロー
//! 1. registry をロックして、キーを watch している listener を登録順に取得
//! 2. ロックを解放
//! 3. 各 listener を現在の state で呼ぶ（失敗はログに出して次へ）
//!    呼ぶ直前にまだ watch しているかを確認するので、同じラウンド中に
//!    unsubscribe された observer は呼ばれない
//!
//! listener の中から subscribe/unsubscribe/set_state を呼んでもデッドロックしない。

use std::sync::Mutex;

use tracing::error;

use super::registry::SubscriptionRegistry;
use crate::domain::ObservedValue;
use crate::sync;

/// Outcome of one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DispatchReport {
    fn merge(&mut self, other: DispatchReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

pub struct NotificationDispatcher<'a> {
    registry: &'a Mutex<SubscriptionRegistry>,
}

impl<'a> NotificationDispatcher<'a> {
    pub fn new(registry: &'a Mutex<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Notify every observer watching `key`.
    pub fn notify(&self, key: &str, state: &ObservedValue) -> DispatchReport {
        let listeners = sync::lock(self.registry).listeners_for(key);

        let mut report = DispatchReport::default();
        for (observer, listener) in listeners {
            if !sync::lock(self.registry).watches(observer, key) {
                continue;
            }
            match listener(state) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    error!(%observer, key, error = %err, "listener failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Notify once per key, in the given order.
    pub fn notify_all<'k, I>(&self, keys: I, state: &ObservedValue) -> DispatchReport
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut report = DispatchReport::default();
        for key in keys {
            report.merge(self.notify(key, state));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ObserverId;
    use crate::subscription::registry::{Listener, listener};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn only_observers_of_the_key_are_notified() {
        let registry = Mutex::new(SubscriptionRegistry::new());
        let on_count = Arc::new(AtomicUsize::new(0));
        let on_label = Arc::new(AtomicUsize::new(0));
        {
            let mut r = registry.lock().unwrap();
            r.insert(ObserverId::new(), counting(&on_count), vec!["count".to_string()]);
            r.insert(ObserverId::new(), counting(&on_label), vec!["label".to_string()]);
        }
        let state = ObservedValue::new(json!({ "count": 1 })).unwrap();

        let report = NotificationDispatcher::new(&registry).notify("count", &state);

        assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });
        assert_eq!(on_count.load(Ordering::SeqCst), 1);
        assert_eq!(on_label.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_failing_listener_does_not_stop_the_others() {
        let registry = Mutex::new(SubscriptionRegistry::new());
        let after = Arc::new(AtomicUsize::new(0));
        {
            let mut r = registry.lock().unwrap();
            r.insert(
                ObserverId::new(),
                listener(|_| Err("render failed".into())),
                vec!["count".to_string()],
            );
            r.insert(ObserverId::new(), counting(&after), vec!["count".to_string()]);
        }
        let state = ObservedValue::new(json!({ "count": 1 })).unwrap();

        let report = NotificationDispatcher::new(&registry).notify("count", &state);

        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_see_the_current_state() {
        let registry = Mutex::new(SubscriptionRegistry::new());
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry.lock().unwrap().insert(
            ObserverId::new(),
            listener(move |state| {
                *sink.lock().unwrap() = state.get("count");
                Ok(())
            }),
            vec!["count".to_string()],
        );
        let state = ObservedValue::new(json!({ "count": 7 })).unwrap();

        NotificationDispatcher::new(&registry).notify_all(["count", "label"], &state);

        assert_eq!(*seen.lock().unwrap(), Some(json!(7)));
    }

    #[test]
    fn observer_removed_earlier_in_the_round_is_skipped() {
        let registry = Arc::new(Mutex::new(SubscriptionRegistry::new()));
        let x = ObserverId::new();
        let y = ObserverId::new();
        let y_calls = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&registry);
        {
            let mut r = registry.lock().unwrap();
            r.insert(
                x,
                listener(move |_| {
                    handle.lock().unwrap().remove(y);
                    Ok(())
                }),
                vec!["count".to_string()],
            );
            r.insert(y, counting(&y_calls), vec!["count".to_string()]);
        }
        let state = ObservedValue::new(json!({ "count": 1 })).unwrap();

        let report = NotificationDispatcher::new(&registry).notify("count", &state);

        assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });
        assert_eq!(y_calls.load(Ordering::SeqCst), 0);
        assert!(!registry.lock().unwrap().contains(y));
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let registry = Arc::new(Mutex::new(SubscriptionRegistry::new()));
        let me = ObserverId::new();
        let handle = Arc::clone(&registry);
        registry.lock().unwrap().insert(
            me,
            listener(move |_| {
                handle.lock().unwrap().remove(me);
                Ok(())
            }),
            vec!["count".to_string()],
        );
        let state = ObservedValue::new(json!({ "count": 1 })).unwrap();

        let report = NotificationDispatcher::new(&registry).notify("count", &state);

        assert_eq!(report.delivered, 1);
        assert!(registry.lock().unwrap().is_empty());
    }
}
