//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 组件协作测试：扇出批次通过读穿服务加载，完成报告交给多路复用器分发

use oxflow::config::{FanOutConfig, HandlerErrorPolicy, ReadThroughConfig};
use oxflow::{
    BoxError, Context, DispatchTable, EventMultiplexer, EventSource, ExitReason, FanOutExecutor,
    Metrics, UnitReport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[path = "../common/mod.rs"]
mod common;

use common::{read_through, Reply, ScriptedLoader};

/// 测试批次失败被汇总，成功记录进入缓存，进度经多路复用器送达
#[tokio::test]
async fn test_batch_through_read_through_and_multiplexer() {
    let loader = Arc::new(ScriptedLoader::new());
    for id in 1..=5u64 {
        if id % 2 == 0 {
            loader.script(id, vec![Reply::Fail(format!("row {} locked", id))]);
        } else {
            loader.script(id, vec![Reply::Found(format!("user{}", id))]);
        }
    }
    let svc = Arc::new(read_through(
        loader.clone(),
        ReadThroughConfig::default(),
        Duration::from_secs(3600),
    ));
    let metrics = Arc::new(Metrics::new());
    let executor = FanOutExecutor::new(
        "pipeline",
        FanOutConfig {
            max_concurrency: 2,
            ..Default::default()
        },
        metrics.clone(),
    );

    let (tx, rx) = mpsc::unbounded_channel::<UnitReport>();
    let worker_svc = svc.clone();
    let batch = tokio::spawn(async move {
        executor
            .run_with_progress(
                (1..=5u64).collect(),
                move |id: u64| {
                    let svc = worker_svc.clone();
                    async move {
                        svc.fetch(&Context::background(), &id)
                            .await
                            .map(|_| ())
                            .map_err(BoxError::from)
                    }
                },
                tx,
            )
            .await
    });

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let table = DispatchTable::new().on("progress", move |report: UnitReport| {
        sink.lock().unwrap().push(report);
        Ok(())
    });
    let mux = EventMultiplexer::new("pipeline", HandlerErrorPolicy::LogAndContinue, metrics);
    let report = mux
        .start(
            vec![EventSource::from_unbounded("progress", rx)],
            CancellationToken::new(),
            Duration::from_secs(5),
            table,
        )
        .await
        .unwrap();

    // 批次结束时发送端被释放，事件源随之耗尽
    assert_eq!(report.reason, ExitReason::Exhausted);
    assert_eq!(report.dispatched, 5);

    let outcome = batch.await.unwrap();
    let mut failed = outcome.failed_units();
    failed.sort();
    assert_eq!(failed, vec!["2", "4"]);
    assert!(outcome.failures()[0]
        .source
        .to_string()
        .starts_with("fetch failed for"));

    let received = received.lock().unwrap();
    assert_eq!(received.iter().filter(|r| !r.is_success()).count(), 2);

    assert_eq!(svc.cache().len().await, 3);
    assert!(svc.cache().get(&"user:2".to_string()).await.is_none());
    assert_eq!(
        svc.cache().get(&"user:3".to_string()).await,
        Some("user3".to_string())
    );
    assert_eq!(loader.calls(), 5);
}
