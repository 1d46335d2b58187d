use std::error::Error;
use std::path::PathBuf;

use async_trait::async_trait;
use bloczone_core::{
    Container, ContainerRegistry, Feature, Middleware, MiddlewareError, Next, ObservedValue, ObserverId,
    StoreConfig, UpdateContext, into_record,
};
use clap::Parser;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Counter demo for bloczone containers
#[derive(Parser, Debug)]
#[command(name = "bloczone")]
#[command(version)]
struct Args {
    /// JSON config file (flush_interval_ms, features)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Feature to enable; may be repeated
    #[arg(short, long = "feature")]
    features: Vec<Feature>,

    /// Periodic flush interval in milliseconds
    #[arg(long)]
    flush_ms: Option<u64>,

    /// Number of increment events to send
    #[arg(short = 'n', long, default_value = "3")]
    increments: u32,
}

/// Logs every guarded update before it is committed.
struct LogAction;

#[async_trait]
impl Middleware for LogAction {
    async fn handle(&self, ctx: &mut UpdateContext, next: Next<'_>) -> Result<(), MiddlewareError> {
        info!(action = ctx.action(), args = %serde_json::Value::Object(ctx.args().clone()), "dispatch");
        let result = next.run(ctx).await;
        debug!(action = ctx.action(), ok = result.is_ok(), "dispatch done");
        result
    }
}

enum Event {
    Increment,
}

fn load_config(args: &Args) -> Result<StoreConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => StoreConfig::default(),
    };
    for feature in &args.features {
        config = config.with_feature(*feature);
    }
    if let Some(ms) = args.flush_ms {
        config.flush_interval_ms = ms;
    }
    Ok(config)
}

fn count_of(state: &ObservedValue) -> i64 {
    state.get("count").and_then(|v| v.as_i64()).unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(?config, "starting");

    // (A) registry に名前付き container を作る
    let registry = ContainerRegistry::new();
    let counter = registry.create_or_get_with("counter", || {
        Container::builder(json!({ "count": 0, "label": "clicks" })).config(config)
    })?;
    counter.add_middleware(LogAction);

    // (B) 別のコンポーネントは registry から同じ container を引く
    let display = ObserverId::new();
    let shared = registry.lookup("counter").ok_or("counter container is gone")?;
    shared.subscribe(
        display,
        |state| {
            println!("display: count = {}", count_of(state));
            Ok(())
        },
        &["count"],
    )?;

    let label = ObserverId::new();
    shared.subscribe(
        label,
        |state| {
            println!("label: {}", state.get("label").unwrap_or(Value::Null));
            Ok(())
        },
        &["label"],
    )?;

    // (C) イベントを channel 経由で dispatch に変換
    let increments = args.increments;
    let (tx, mut rx) = mpsc::channel(16);
    let producer = tokio::spawn(async move {
        for _ in 0..increments {
            if tx.send(Event::Increment).await.is_err() {
                break;
            }
        }
    });

    while let Some(event) = rx.recv().await {
        match event {
            Event::Increment => {
                let next = count_of(&counter.get_state()) + 1;
                counter.dispatch("increment", into_record(json!({ "count": next }))?).await?;
            }
        }
    }
    producer.await?;

    // (D) batch: まとめて適用（batched-updates が有効なら通知は 1 回）
    let base = count_of(&counter.get_state());
    counter
        .add_batch(|c| async move {
            c.dispatch("increment", into_record(json!({ "count": base + 1 }))?).await?;
            c.dispatch("increment", into_record(json!({ "count": base + 2 }))?).await?;
            c.dispatch("rename", into_record(json!({ "label": "batched clicks" }))?).await?;
            Ok::<_, bloczone_core::StoreError>(())
        })
        .await?;

    // (E) unsubscribe 後は通知されない
    counter.unsubscribe(display);
    counter.set_state(into_record(json!({ "count": 0 }))?);

    println!("final state: {}", counter.get_state().to_value());
    println!("counts: {}", serde_json::to_string(&counter.counts())?);
    Ok(())
}
