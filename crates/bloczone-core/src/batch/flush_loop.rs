//! FlushLoop - 定期的に pending キューを flush するバックグラウンドタスク
//!
//! # フロー
//! 1. `interval` ごとに target を upgrade（container が消えていたら終了）
//! 2. pending があれば flush
//! 3. `FlushTimer` が drop されると shutdown が通知されて終了
//!
//! target は `Weak` でしか持たないので、timer が container を生かし続けることはない。

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Something the timer can flush.
pub(crate) trait FlushTarget: Send + Sync + 'static {
    fn has_pending(&self) -> bool;

    /// Returns `false` if another flush was already running.
    fn flush(&self) -> bool;
}

/// Handle to the running loop. Dropping it stops the loop.
pub(crate) struct FlushTimer {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl FlushTimer {
    /// Spawn the loop on the current tokio runtime.
    ///
    /// Returns `None` (and logs) when called outside a runtime.
    pub(crate) fn spawn<T: FlushTarget>(target: Weak<T>, period: Duration) -> Option<Self> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no tokio runtime; periodic flush disabled");
                return None;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = handle.spawn(flush_loop(target, period, shutdown_rx));
        debug!(?period, "flush loop started");
        Some(Self { shutdown_tx, join })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }
}

async fn flush_loop<T: FlushTarget>(
    target: Weak<T>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else {
                    break;
                };
                if target.has_pending() {
                    target.flush();
                }
            }
        }
    }
    debug!("flush loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Move the paused clock forward and let the loop task catch up.
    async fn advance(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[derive(Default)]
    struct CountingTarget {
        pending: AtomicBool,
        flushes: AtomicUsize,
    }

    impl FlushTarget for CountingTarget {
        fn has_pending(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }

        fn flush(&self) -> bool {
            self.pending.store(false, Ordering::SeqCst);
            self.flushes.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn spawn_outside_a_runtime_returns_none() {
        let target = Arc::new(CountingTarget::default());
        assert!(FlushTimer::spawn(Arc::downgrade(&target), Duration::from_millis(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_only_when_something_is_pending() {
        let target = Arc::new(CountingTarget::default());
        let _timer = FlushTimer::spawn(Arc::downgrade(&target), Duration::from_millis(5)).unwrap();

        advance(30).await;
        assert_eq!(target.flushes.load(Ordering::SeqCst), 0);

        target.pending.store(true, Ordering::SeqCst);
        advance(30).await;
        assert_eq!(target.flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_when_the_target_is_gone() {
        let target = Arc::new(CountingTarget::default());
        let timer = FlushTimer::spawn(Arc::downgrade(&target), Duration::from_millis(5)).unwrap();

        drop(target);
        advance(30).await;
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_timer_stops_the_loop() {
        let target = Arc::new(CountingTarget::default());
        let timer = FlushTimer::spawn(Arc::downgrade(&target), Duration::from_millis(5)).unwrap();

        drop(timer);
        advance(30).await;

        target.pending.store(true, Ordering::SeqCst);
        advance(30).await;
        assert_eq!(target.flushes.load(Ordering::SeqCst), 0);
    }
}
