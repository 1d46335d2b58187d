//! DependencyTracker - 「いま評価中の observer」スロット
//!
//! # 仕組み
//! 1. `begin(observer)` でスロットに observer をセット
//! 2. その間に行われた tracked read がスロットに記録される
//! 3. `finish()`（または guard の drop）でスロットを空にする
//!
//! # 制約
//! - 非再入: effect 実行中に別の effect を始めると `EffectReentered`
//! - 記録するのは effect を開始したスレッドからの read だけ

use std::sync::Mutex;
use std::thread::{self, ThreadId};

use crate::domain::ObserverId;
use crate::error::StoreError;
use crate::sync;

struct ActiveEffect {
    observer: ObserverId,
    thread: ThreadId,
    reads: Vec<String>,
}

#[derive(Default)]
pub struct DependencyTracker {
    active: Mutex<Option<ActiveEffect>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an effect for `observer`. Fails with `EffectReentered` while
    /// another effect holds the slot.
    pub fn begin(&self, observer: ObserverId) -> Result<EffectGuard<'_>, StoreError> {
        let mut slot = sync::lock(&self.active);
        if slot.is_some() {
            return Err(StoreError::EffectReentered(observer));
        }
        *slot = Some(ActiveEffect {
            observer,
            thread: thread::current().id(),
            reads: Vec::new(),
        });
        Ok(EffectGuard { tracker: self })
    }

    /// Run `body` as an effect of `observer` and return the keys it read.
    pub fn run<F: FnOnce()>(&self, observer: ObserverId, body: F) -> Result<Vec<String>, StoreError> {
        let guard = self.begin(observer)?;
        body();
        Ok(guard.finish())
    }

    /// Record a read of `key`. Returns `true` if an effect picked it up.
    pub fn track(&self, key: &str) -> bool {
        let mut slot = sync::lock(&self.active);
        match slot.as_mut() {
            Some(effect) if effect.thread == thread::current().id() => {
                if !effect.reads.iter().any(|k| k == key) {
                    effect.reads.push(key.to_string());
                }
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> Option<ObserverId> {
        sync::lock(&self.active).as_ref().map(|effect| effect.observer)
    }
}

/// Clears the active-effect slot when dropped.
pub struct EffectGuard<'a> {
    tracker: &'a DependencyTracker,
}

impl EffectGuard<'_> {
    /// End the effect, returning the keys read in first-read order.
    pub fn finish(self) -> Vec<String> {
        sync::lock(&self.tracker.active)
            .take()
            .map(|effect| effect.reads)
            .unwrap_or_default()
    }
}

impl Drop for EffectGuard<'_> {
    fn drop(&mut self) {
        sync::lock(&self.tracker.active).take();
    }
}
