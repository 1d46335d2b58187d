//! ContainerRegistry - 名前付き container の共有
//!
//! # 学習ポイント
//! - `HashMap<BlocId, Weak<_>>` で entry を持つので、registry 自体は container を生かさない
//! - 最後の `Container` が drop されると `ReleaseHook` が entry を消す
//! - `prune()` は残った dead entry をまとめて掃除する
//!
//! # 使用例
//! ```ignore
//! let registry = ContainerRegistry::new();
//! let counter = registry.create_or_get("counter", json!({ "count": 0 }))?;
//!
//! // 別のコンポーネントから同じ instance を取得
//! let same = registry.lookup("counter").expect("still alive");
//! assert!(counter.ptr_eq(&same));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::debug;

use crate::container::{Container, ContainerBuilder, ContainerInner};
use crate::domain::BlocId;
use crate::error::StoreError;
use crate::sync;

type Entries = Mutex<HashMap<BlocId, Weak<ContainerInner>>>;

/// Explicitly passed lookup table of named containers.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct ContainerRegistry {
    entries: Arc<Entries>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live container named `id`, or create one from `initial`.
    ///
    /// `initial` is ignored when the container already exists.
    pub fn create_or_get(&self, id: impl Into<BlocId>, initial: Value) -> Result<Container, StoreError> {
        self.create_or_get_with(id, || Container::builder(initial))
    }

    /// Like [`create_or_get`](Self::create_or_get), but `make` is only called
    /// when a new container is needed.
    pub fn create_or_get_with<F>(&self, id: impl Into<BlocId>, make: F) -> Result<Container, StoreError>
    where
        F: FnOnce() -> ContainerBuilder,
    {
        let id = id.into();
        let mut entries = sync::lock(&self.entries);

        if let Some(inner) = entries.get(&id).and_then(Weak::upgrade) {
            debug!(%id, "reusing container");
            return Ok(Container::from_inner(inner));
        }

        let container = make().build()?;
        container.set_release_hook(ReleaseHook {
            entries: Arc::downgrade(&self.entries),
            id: id.clone(),
        });
        entries.insert(id.clone(), Arc::downgrade(container.inner()));
        debug!(%id, "container created");
        Ok(container)
    }

    /// `None` when nothing named `id` is alive.
    pub fn lookup(&self, id: impl Into<BlocId>) -> Option<Container> {
        let id = id.into();
        sync::lock(&self.entries)
            .get(&id)
            .and_then(Weak::upgrade)
            .map(Container::from_inner)
    }

    /// Drop entries whose container is gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut entries = sync::lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, inner| inner.strong_count() > 0);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "pruned dead containers");
        }
        removed
    }

    pub fn len(&self) -> usize {
        sync::lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        sync::lock(&self.entries).is_empty()
    }
}

/// Removes a container's entry when the container itself is dropped.
pub(crate) struct ReleaseHook {
    entries: Weak<Entries>,
    id: BlocId,
}

impl ReleaseHook {
    pub(crate) fn release(self) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let mut entries = sync::lock(&entries);
        // 同じ名前で作り直された container の entry は消さない
        let dead = entries
            .get(&self.id)
            .is_some_and(|inner| inner.strong_count() == 0);
        if dead {
            entries.remove(&self.id);
            debug!(id = %self.id, "container released");
        }
    }
}
