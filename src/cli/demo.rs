//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了演示命令：读穿服务之上的扇出批次，由多路复用器施加空闲超时和取消。

use crate::backend::expiring::ExpiringCache;
use crate::cli::DemoArgs;
use crate::client::{loader::MemoryLoader, read_through::ReadThroughService};
use crate::config::Config;
use crate::context::Context;
use crate::error::BoxError;
use crate::metrics::Metrics;
use crate::sync::fan_out::{BatchOutcome, FanOutExecutor, UnitReport};
use crate::sync::multiplexer::{DispatchTable, EventMultiplexer, EventSource};
use crate::utils::init_logging;
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
struct UserRecord {
    id: u64,
    username: String,
    email: String,
    active: bool,
}

type UserService = ReadThroughService<MemoryLoader<u64, UserRecord>>;

pub async fn execute(args: &DemoArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    init_logging(&config.global.log_level);

    let name = config.global.service_name.clone();
    let metrics = Arc::new(Metrics::new());
    let shutdown = CancellationToken::new();

    let cache: Arc<ExpiringCache<String, UserRecord>> = Arc::new(
        ExpiringCache::new(format!("{}-cache", name), config.cache.ttl())
            .with_metrics(metrics.clone()),
    );
    let sweeper = config
        .cache
        .cleanup_interval()
        .map(|interval| cache.spawn_sweeper(interval, shutdown.child_token()));

    let loader = Arc::new(MemoryLoader::new());
    for id in 1..=args.units {
        loader.insert(
            id,
            UserRecord {
                id,
                username: format!("user{}", id),
                email: format!("user{}@example.com", id),
                active: id % 2 == 1,
            },
        );
        if args.fail_every > 0 && id % args.fail_every == 0 {
            loader.fail_with(id, "backing store unavailable");
        }
    }

    let service: Arc<UserService> = Arc::new(ReadThroughService::new(
        name.clone(),
        cache.clone(),
        loader.clone(),
        config.read_through.clone(),
        metrics.clone(),
    ));

    // 第一轮全部回源，第二轮只有失败过的记录会再次回源
    for round in 1..=2 {
        println!("=== Round {} ===", round);
        let outcome = run_round(&config, &service, &metrics, args.units, &shutdown).await?;
        print_outcome(&outcome);
        println!("loader calls so far: {}\n", loader.load_count());
    }

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    if !config.global.enable_metrics {
        return Ok(());
    }
    println!("=== Metrics ===");
    if args.json {
        println!("{}", metrics.to_json()?);
    } else {
        print!("{}", metrics.render());
    }
    Ok(())
}

async fn run_round(
    config: &Config,
    service: &Arc<UserService>,
    metrics: &Arc<Metrics>,
    units: u64,
    shutdown: &CancellationToken,
) -> Result<BatchOutcome> {
    let executor = FanOutExecutor::new(
        config.global.service_name.clone(),
        config.fan_out.clone(),
        metrics.clone(),
    );
    let (progress_tx, progress_rx) = mpsc::unbounded_channel::<UnitReport>();

    let worker_service = Arc::clone(service);
    let batch = tokio::spawn(async move {
        executor
            .run_with_progress(
                (1..=units).collect(),
                move |id: u64| {
                    let service = Arc::clone(&worker_service);
                    async move {
                        let ctx = Context::background();
                        service
                            .fetch(&ctx, &id)
                            .await
                            .map(|_| ())
                            .map_err(BoxError::from)
                    }
                },
                progress_tx,
            )
            .await
    });

    let cancel = shutdown.child_token();
    let interrupt = spawn_interrupt_listener(cancel.clone());

    let (multiplexer, idle_timeout) =
        EventMultiplexer::from_config("progress", &config.multiplexer, metrics.clone());
    let table = DispatchTable::new().on("batch", |report: UnitReport| {
        match &report.error {
            None => println!("  ✅ unit {} done", report.unit),
            Some(error) => println!("  ❌ unit {} failed: {}", report.unit, error),
        }
        Ok(())
    });
    let report = multiplexer
        .start(
            vec![EventSource::from_unbounded("batch", progress_rx)],
            cancel.clone(),
            idle_timeout,
            table,
        )
        .await?;
    cancel.cancel();
    let _ = interrupt.await;
    println!(
        "multiplexer exited: {:?} after {} events",
        report.reason, report.dispatched
    );

    Ok(batch.await?)
}

/// Ctrl-C 时取消本轮；令牌被取消后监听任务随之退出
fn spawn_interrupt_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    info!("interrupt received, cancelling multiplexer");
                    cancel.cancel();
                }
            }
        }
    })
}

fn print_outcome(outcome: &BatchOutcome) {
    println!(
        "batch: total={}, succeeded={}, failed={}",
        outcome.total(),
        outcome.succeeded(),
        outcome.failures().len()
    );
    for failure in outcome.failures() {
        println!("  - {}", failure);
    }
}
