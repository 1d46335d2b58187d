//! Middleware - update の commit 前に走るインターセプタ
//!
//! # 学習ポイント
//! - `#[async_trait]` による object-safe な async trait
//! - 継続 (`Next`) を渡すチェーン: 呼べば次へ、呼ばなければそこで停止
//! - `&mut UpdateContext` を共有するので、引数の書き換えがそのまま commit される
//!
//! # 使用例
//! ```ignore
//! struct Clamp;
//!
//! #[async_trait]
//! impl Middleware for Clamp {
//!     async fn handle(&self, ctx: &mut UpdateContext, next: Next<'_>) -> Result<(), MiddlewareError> {
//!         if let Some(count) = ctx.args_mut().get_mut("count") {
//!             *count = json!(count.as_i64().unwrap_or(0).min(10));
//!         }
//!         next.run(ctx).await
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ObservedValue, Record};
use crate::error::MiddlewareError;

/// Everything a middleware sees about one proposed update.
pub struct UpdateContext {
    state: ObservedValue,
    action: String,
    args: Record,
    completed: bool,
}

impl UpdateContext {
    pub fn new(state: ObservedValue, action: impl Into<String>, args: Record) -> Self {
        Self {
            state,
            action: action.into(),
            args,
            completed: false,
        }
    }

    /// Live state, before this update is committed.
    pub fn state(&self) -> &ObservedValue {
        &self.state
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn args(&self) -> &Record {
        &self.args
    }

    /// Changes made here are what gets committed.
    pub fn args_mut(&mut self) -> &mut Record {
        &mut self.args
    }

    /// `true` once the last middleware has passed control on.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn into_args(self) -> Record {
        self.args
    }
}

/// Interceptor run before a guarded update commits.
///
/// - call `next.run(ctx).await` to pass control on
/// - return `Ok(())` without calling it to drop the update silently
/// - return `Err` to abort the update; the error reaches the caller
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut UpdateContext, next: Next<'_>) -> Result<(), MiddlewareError>;
}

/// Continuation: the rest of the chain after the current middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { chain }
    }

    pub async fn run(self, ctx: &mut UpdateContext) -> Result<(), MiddlewareError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(ctx, Next::new(rest)).await,
            None => {
                ctx.completed = true;
                Ok(())
            }
        }
    }
}

/// Middleware built from a synchronous closure.
///
/// The closure may edit the context or fail; on success the chain continues.
pub struct FnMiddleware<F> {
    f: F,
}

pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&mut UpdateContext) -> Result<(), MiddlewareError> + Send + Sync,
{
    FnMiddleware { f }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut UpdateContext) -> Result<(), MiddlewareError> + Send + Sync,
{
    async fn handle(&self, ctx: &mut UpdateContext, next: Next<'_>) -> Result<(), MiddlewareError> {
        (self.f)(ctx)?;
        next.run(ctx).await
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every middleware passed control on; the update may commit.
    Proceed,
    /// Some middleware returned without calling `next`.
    Halted,
}

/// Ordered middleware chain (order = registration order).
#[derive(Default, Clone)]
pub struct MiddlewarePipeline {
    chain: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.chain.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Run the chain from the first middleware.
    pub async fn run(&self, ctx: &mut UpdateContext) -> Result<PipelineOutcome, MiddlewareError> {
        Next::new(&self.chain).run(ctx).await?;
        Ok(if ctx.is_completed() {
            PipelineOutcome::Proceed
        } else {
            PipelineOutcome::Halted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn ctx(args: serde_json::Value) -> UpdateContext {
        let state = ObservedValue::new(json!({ "count": 0 })).unwrap();
        UpdateContext::new(state, "inc", crate::domain::into_record(args).unwrap())
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(&self, ctx: &mut UpdateContext, next: Next<'_>) -> Result<(), MiddlewareError> {
            self.log.lock().unwrap().push(format!("{}:before", self.name));
            let result = next.run(ctx).await;
            self.log.lock().unwrap().push(format!("{}:after", self.name));
            result
        }
    }

    struct Swallow;

    #[async_trait]
    impl Middleware for Swallow {
        async fn handle(&self, _ctx: &mut UpdateContext, _next: Next<'_>) -> Result<(), MiddlewareError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_pipeline_proceeds() {
        let pipeline = MiddlewarePipeline::new();
        let mut ctx = ctx(json!({ "count": 1 }));
        assert_eq!(pipeline.run(&mut ctx).await.unwrap(), PipelineOutcome::Proceed);
    }

    #[tokio::test]
    async fn middleware_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = MiddlewarePipeline::new();
        for name in ["first", "second"] {
            pipeline.push(Arc::new(Recorder {
                name,
                log: Arc::clone(&log),
            }));
        }

        let mut ctx = ctx(json!({ "count": 1 }));
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:before", "second:before", "second:after", "first:after"]
        );
    }

    #[tokio::test]
    async fn args_mutation_is_visible_after_the_run() {
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.push(Arc::new(from_fn(|ctx| {
            ctx.args_mut().insert("count".to_string(), json!(5));
            Ok(())
        })));

        let mut ctx = ctx(json!({ "count": 2 }));
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.into_args().get("count"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn failure_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.push(Arc::new(from_fn(|_| Err(MiddlewareError::new("denied")))));
        pipeline.push(Arc::new(Recorder {
            name: "unreached",
            log: Arc::clone(&log),
        }));

        let mut ctx = ctx(json!({ "count": 1 }));
        let err = pipeline.run(&mut ctx).await.unwrap_err();

        assert_eq!(err.message(), "denied");
        assert!(log.lock().unwrap().is_empty());
        assert!(!ctx.is_completed());
    }

    #[tokio::test]
    async fn not_calling_next_halts_silently() {
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.push(Arc::new(Swallow));

        let mut ctx = ctx(json!({ "count": 1 }));
        assert_eq!(pipeline.run(&mut ctx).await.unwrap(), PipelineOutcome::Halted);
    }

    #[tokio::test]
    async fn middleware_sees_action_and_state() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.push(Arc::new(from_fn(move |ctx| {
            *sink.lock().unwrap() = Some((ctx.action().to_string(), ctx.state().get("count")));
            Ok(())
        })));

        let mut ctx = ctx(json!({ "count": 1 }));
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            Some(("inc".to_string(), Some(json!(0))))
        );
    }
}
