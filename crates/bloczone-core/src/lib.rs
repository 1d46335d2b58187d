//! bloczone-core
//!
//! Fine-grained reactive state containers ("blocs").
//!
//! # モジュール構成
//! - **domain**: 値モデル（Record, ObservedValue, ids, feature, config）
//! - **state**: ObservableState と DependencyTracker（どのキーが読まれたかを記録）
//! - **subscription**: observer の登録と通知
//! - **middleware**: guarded update 前のインターセプタチェーン
//! - **batch**: update のキューイングと flush
//! - **container**: 上の部品をまとめた公開 API
//! - **registry**: 名前付き container の共有
//! - **observability**: container の状態ビュー
//!
//! # 使用例
//! ```ignore
//! let counter = Container::new(json!({ "count": 0 }))?;
//! counter.subscribe(ObserverId::new(), |state| {
//!     println!("count = {:?}", state.get("count"));
//!     Ok(())
//! }, &["count"])?;
//!
//! counter.dispatch("increment", into_record(json!({ "count": 1 }))?).await?;
//! ```

mod sync;

pub mod batch;
pub mod container;
pub mod domain;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod registry;
pub mod state;
pub mod subscription;

pub use container::{Container, ContainerBuilder};
pub use domain::{BlocId, Feature, FeatureSet, ObservedValue, ObserverId, Record, StoreConfig, into_record};
pub use error::{ListenerError, MiddlewareError, StoreError};
pub use middleware::{Middleware, Next, UpdateContext, from_fn};
pub use observability::ContainerCounts;
pub use registry::ContainerRegistry;
pub use subscription::Registration;
