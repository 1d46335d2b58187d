//! Container - reactive state の公開 API
//!
//! ObservableState / SubscriptionRegistry / MiddlewarePipeline / BatchScheduler を
//! まとめて 1 つの container にする。
//!
//! # update の流れ
//! ```text
//! dispatch(action, partial)
//!   -> middleware（有効なら）: 書き換え / 中断 / 停止
//!   -> batch scheduler（有効なら）: キューに積む or 直接適用
//!   -> ObservableState::write: 旧値と比較して更新
//!   -> NotificationDispatcher: 該当キーを watch している observer に通知
//! ```
//!
//! `set_state(partial)` は middleware と batch を通らない（unguarded）。
//!
//! # ロック順序
//! subscriptions -> tracker -> record。listener 呼び出しと `.await` の間は
//! どのロックも保持しない。

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::{Level, debug, trace, warn};

use crate::batch::{self, BatchScheduler, FlushTarget, FlushTimer, PendingUpdate, Proposal};
use crate::domain::{Feature, FeatureSet, ObservedValue, ObserverId, Record, StoreConfig};
use crate::error::{ListenerError, StoreError};
use crate::middleware::{Middleware, MiddlewarePipeline, PipelineOutcome, UpdateContext};
use crate::observability::ContainerCounts;
use crate::registry::ReleaseHook;
use crate::state::ObservableState;
use crate::subscription::{Listener, NotificationDispatcher, Registration, SubscriptionRegistry, listener};
use crate::sync;

pub(crate) struct ContainerInner {
    state: ObservableState,
    subscriptions: Mutex<SubscriptionRegistry>,
    middleware: RwLock<MiddlewarePipeline>,
    scheduler: Mutex<BatchScheduler>,
    features: Mutex<FeatureSet>,
    config: StoreConfig,
    flush_timer: Mutex<Option<FlushTimer>>,
    release: Mutex<Option<ReleaseHook>>,
}

impl ContainerInner {
    fn new(state: ObservableState, config: StoreConfig) -> Self {
        Self {
            state,
            subscriptions: Mutex::new(SubscriptionRegistry::new()),
            middleware: RwLock::new(MiddlewarePipeline::new()),
            scheduler: Mutex::new(BatchScheduler::new()),
            features: Mutex::new(FeatureSet::default()),
            config,
            flush_timer: Mutex::new(None),
            release: Mutex::new(None),
        }
    }

    fn is_enabled(&self, feature: Feature) -> bool {
        sync::lock(&self.features).is_enabled(feature)
    }

    /// Compare-and-write one key, notifying its observers if it changed.
    fn write(&self, key: &str, value: Value) -> bool {
        self.state.write(key, value, |key, state| {
            NotificationDispatcher::new(&self.subscriptions).notify(key, state);
        })
    }

    fn commit(&self, action: &str, partial: Record) {
        debug!(action, keys = partial.len(), "commit");
        for (key, value) in partial {
            self.write(&key, value);
        }
    }

    fn propose(&self, action: String, partial: Record) {
        let update = PendingUpdate {
            action,
            base: tracing::enabled!(Level::DEBUG).then(|| self.state.get_state().snapshot()),
            partial,
        };
        let proposal = sync::lock(&self.scheduler).propose(update);
        match proposal {
            Proposal::Queued => trace!("update queued"),
            Proposal::Direct { update, backlog } => {
                // 古いキューを先に適用してから、新しい update を直接適用
                if backlog {
                    self.drain(FlushClaim::adopt(&self.scheduler));
                }
                self.commit(&update.action, update.partial);
            }
        }
    }

    /// Drain the queue. Only one flush runs at a time.
    fn flush_pending(&self) -> bool {
        match FlushClaim::acquire(&self.scheduler) {
            Some(claim) => {
                self.drain(claim);
                true
            }
            None => false,
        }
    }

    fn drain(&self, mut claim: FlushClaim<'_>) {
        while let Some(updates) = claim.next_batch() {
            let state = self.state.get_state();
            for update in &updates {
                let Some(base) = &update.base else {
                    continue;
                };
                for key in update.partial.keys() {
                    if base.get(key) != state.get(key).as_ref() {
                        debug!(action = %update.action, key = %key, "key changed after proposal, last write wins");
                    }
                }
            }

            let count = updates.len();
            let changed = self.state.apply_silently(batch::coalesce(updates));
            debug!(updates = count, changed = changed.len(), "flush");
            NotificationDispatcher::new(&self.subscriptions)
                .notify_all(changed.iter().map(String::as_str), &state);
        }
    }

    fn register(&self, observer: ObserverId, listener: Listener, keys: Vec<String>) -> Result<Registration, StoreError> {
        let mut subscriptions = sync::lock(&self.subscriptions);
        // 宣言されたキーを一度ずつ読んで依存関係を seed する
        let seeded = self.state.tracker().run(observer, || {
            for key in &keys {
                self.state.read(key);
            }
        })?;
        Ok(subscriptions.insert(observer, listener, seeded))
    }
}

impl FlushTarget for ContainerInner {
    fn has_pending(&self) -> bool {
        sync::lock(&self.scheduler).has_pending()
    }

    fn flush(&self) -> bool {
        self.flush_pending()
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        if let Some(hook) = sync::lock(&self.release).take() {
            hook.release();
        }
    }
}

/// One reactive state instance plus its subscription, middleware and batch
/// machinery.
///
/// Cloning is cheap and every clone is a strong holder of the same container.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Unnamed container with no features enabled.
    pub fn new(initial: Value) -> Result<Self, StoreError> {
        Self::builder(initial).build()
    }

    pub fn builder(initial: Value) -> ContainerBuilder {
        ContainerBuilder::new(initial)
    }

    /// Build around a record the caller already holds.
    pub fn with_observed(observed: ObservedValue) -> Self {
        Self::from_state(ObservableState::from_observed(observed), StoreConfig::default())
    }

    fn from_state(state: ObservableState, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(ContainerInner::new(state, config)),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContainerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ContainerInner> {
        &self.inner
    }

    pub(crate) fn set_release_hook(&self, hook: ReleaseHook) {
        *sync::lock(&self.inner.release) = Some(hook);
    }

    /// `true` when both handles refer to the same container.
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// The exact record the container was built around.
    pub fn get_raw_state(&self) -> Result<ObservedValue, StoreError> {
        self.inner.state.get_raw_state()
    }

    pub fn get_state(&self) -> ObservedValue {
        self.inner.state.get_state()
    }

    /// Tracked read of one property.
    pub fn read(&self, key: &str) -> Option<Value> {
        self.inner.state.read(key)
    }

    /// Unguarded update: bypasses middleware and batching.
    ///
    /// Each key is written and notified in turn.
    pub fn set_state(&self, partial: Record) {
        self.inner.commit("set_state", partial);
    }

    /// Guarded update.
    ///
    /// Runs the middleware chain (if enabled), then either queues the result
    /// (batched updates) or commits it. A middleware failure is returned as
    /// `MiddlewareAborted` and leaves the state untouched.
    pub async fn dispatch(&self, action: impl Into<String>, partial: Record) -> Result<(), StoreError> {
        let action = action.into();

        let partial = if self.inner.is_enabled(Feature::Middleware) {
            let pipeline = sync::read(&self.inner.middleware).clone();
            let mut ctx = UpdateContext::new(self.get_state(), action.clone(), partial);
            match pipeline.run(&mut ctx).await {
                Ok(PipelineOutcome::Proceed) => ctx.into_args(),
                Ok(PipelineOutcome::Halted) => {
                    debug!(action = %action, "update halted by middleware");
                    return Ok(());
                }
                Err(source) => {
                    warn!(action = %action, error = %source, "update aborted by middleware");
                    return Err(StoreError::MiddlewareAborted { action, source });
                }
            }
        } else {
            partial
        };

        if self.inner.is_enabled(Feature::BatchedUpdates) {
            self.inner.propose(action, partial);
        } else {
            self.inner.commit(&action, partial);
        }
        Ok(())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Watch exactly `keys`. Re-subscribing an identity keeps the first registration.
    pub fn subscribe<F>(&self, observer: ObserverId, f: F, keys: &[&str]) -> Result<Registration, StoreError>
    where
        F: Fn(&ObservedValue) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let keys = keys.iter().map(|key| key.to_string()).collect();
        self.inner.register(observer, listener(f), keys)
    }

    /// Watch every key present right now. Keys added later are not tracked.
    pub fn subscribe_all<F>(&self, observer: ObserverId, f: F) -> Result<Registration, StoreError>
    where
        F: Fn(&ObservedValue) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let keys = self.get_state().keys();
        self.inner.register(observer, listener(f), keys)
    }

    /// Returns `false` (and warns) if `observer` was not subscribed.
    pub fn unsubscribe(&self, observer: ObserverId) -> bool {
        sync::lock(&self.inner.subscriptions).remove(observer)
    }

    /// Stop watching a single key.
    pub fn unsubscribe_key(&self, observer: ObserverId, key: &str) -> bool {
        sync::lock(&self.inner.subscriptions).remove_key(observer, key)
    }

    pub fn is_subscribed(&self, observer: ObserverId) -> bool {
        sync::lock(&self.inner.subscriptions).contains(observer)
    }

    pub fn watched_keys(&self, observer: ObserverId) -> Vec<String> {
        sync::lock(&self.inner.subscriptions).watched_keys(observer)
    }

    // =========================================================================
    // Middleware / batching / features
    // =========================================================================

    pub fn add_middleware<M: Middleware + 'static>(&self, middleware: M) {
        sync::write(&self.inner.middleware).push(Arc::new(middleware));
    }

    /// Run `f` inside a batch scope, then flush.
    ///
    /// Guarded updates made while the scope is open are queued and applied
    /// together when the outermost scope closes.
    pub async fn add_batch<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Container) -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = BatchScope::enter(&self.inner);
        let output = f(self.clone()).await;
        if scope.close() {
            self.inner.flush_pending();
        }
        output
    }

    /// Apply queued updates now. Returns `false` if a flush was already running.
    pub fn flush(&self) -> bool {
        self.inner.flush_pending()
    }

    pub fn use_feature(&self, feature: Feature) {
        sync::lock(&self.inner.features).enable(feature);
        debug!(%feature, "feature enabled");

        if feature == Feature::BatchedUpdates {
            let mut timer = sync::lock(&self.inner.flush_timer);
            if timer.as_ref().is_none_or(FlushTimer::is_finished) {
                *timer = FlushTimer::spawn(Arc::downgrade(&self.inner), self.inner.config.flush_interval());
            }
        }
    }

    /// String form of [`use_feature`](Self::use_feature); unknown names fail.
    pub fn use_feature_named(&self, name: &str) -> Result<(), StoreError> {
        self.use_feature(name.parse()?);
        Ok(())
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.inner.is_enabled(feature)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn counts(&self) -> ContainerCounts {
        let (observers, edges) = {
            let subscriptions = sync::lock(&self.inner.subscriptions);
            (subscriptions.len(), subscriptions.edge_count())
        };
        let (pending, phase) = {
            let scheduler = sync::lock(&self.inner.scheduler);
            (scheduler.pending_len(), scheduler.phase())
        };
        ContainerCounts {
            observers,
            edges,
            middleware: sync::read(&self.inner.middleware).len(),
            pending,
            phase,
            features: *sync::lock(&self.inner.features),
            flush_timer: sync::lock(&self.inner.flush_timer)
                .as_ref()
                .is_some_and(|timer| !timer.is_finished()),
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

/// Open batch scope; closes on drop if `close` was never reached.
struct BatchScope<'a> {
    inner: &'a ContainerInner,
    open: bool,
}

impl<'a> BatchScope<'a> {
    fn enter(inner: &'a ContainerInner) -> Self {
        sync::lock(&inner.scheduler).enter();
        Self { inner, open: true }
    }

    /// Returns `true` when this was the outermost scope.
    fn close(mut self) -> bool {
        self.open = false;
        sync::lock(&self.inner.scheduler).exit()
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if self.open {
            sync::lock(&self.inner.scheduler).exit();
        }
    }
}

/// Exclusive right to drain the queue.
///
/// Released by the scheduler once the queue is empty; if the drain unwinds
/// first (a panicking listener), dropping the claim releases it.
struct FlushClaim<'a> {
    scheduler: &'a Mutex<BatchScheduler>,
    held: bool,
}

impl<'a> FlushClaim<'a> {
    fn acquire(scheduler: &'a Mutex<BatchScheduler>) -> Option<Self> {
        sync::lock(scheduler)
            .try_begin_flush()
            .then_some(Self { scheduler, held: true })
    }

    /// Take over a flush the scheduler already claimed for us.
    fn adopt(scheduler: &'a Mutex<BatchScheduler>) -> Self {
        Self { scheduler, held: true }
    }

    fn next_batch(&mut self) -> Option<Vec<PendingUpdate>> {
        let next = sync::lock(self.scheduler).next_batch();
        if next.is_none() {
            self.held = false;
        }
        next
    }
}

impl Drop for FlushClaim<'_> {
    fn drop(&mut self) {
        if self.held {
            sync::lock(self.scheduler).abort_flush();
        }
    }
}

/// Builds a container with config, features and middleware in place.
///
/// # 使用例
/// ```ignore
/// let container = Container::builder(json!({ "count": 0 }))
///     .feature(Feature::Middleware)
///     .middleware(from_fn(|ctx| Ok(())))
///     .build()?;
/// ```
pub struct ContainerBuilder {
    initial: Value,
    config: StoreConfig,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl ContainerBuilder {
    pub fn new(initial: Value) -> Self {
        Self {
            initial,
            config: StoreConfig::default(),
            middleware: Vec::new(),
        }
    }

    /// Replaces the config, including its feature list.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.config = self.config.with_feature(feature);
        self
    }

    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Fails with `InvalidState` when the initial value is not an object.
    pub fn build(self) -> Result<Container, StoreError> {
        let state = ObservableState::new(self.initial)?;
        let features = self.config.features.clone();
        let container = Container::from_state(state, self.config);

        {
            let mut pipeline = sync::write(&container.inner.middleware);
            for middleware in self.middleware {
                pipeline.push(middleware);
            }
        }
        for feature in features {
            container.use_feature(feature);
        }
        Ok(container)
    }
}
