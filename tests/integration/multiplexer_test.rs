//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 事件多路复用器集成测试
//!
//! 全部使用暂停的 tokio 时钟，计时断言是确定的

use oxflow::config::{HandlerErrorPolicy, MultiplexerConfig};
use oxflow::{
    DispatchTable, EventMultiplexer, EventSource, ExitReason, Metrics, MultiplexerState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[path = "../common/mod.rs"]
mod common;

use common::setup_logging;

fn multiplexer() -> (EventMultiplexer, Arc<Metrics>) {
    setup_logging();
    let metrics = Arc::new(Metrics::new());
    (
        EventMultiplexer::new("mux", HandlerErrorPolicy::LogAndContinue, metrics.clone()),
        metrics,
    )
}

fn recording_table(source: &str) -> (DispatchTable<u32>, Arc<Mutex<Vec<u32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let table = DispatchTable::new().on(source, move |value: u32| {
        sink.lock().unwrap().push(value);
        Ok(())
    });
    (table, seen)
}

/// 测试事件晚于空闲超时到达时以超时退出，处理器未被调用
#[tokio::test(start_paused = true)]
async fn test_idle_timeout_before_first_event() {
    let (mux, _) = multiplexer();
    let (table, seen) = recording_table("late");
    let source = EventSource::once("late", async {
        sleep(Duration::from_millis(100)).await;
        1u32
    });

    let start = Instant::now();
    let report = mux
        .start(
            vec![source],
            CancellationToken::new(),
            Duration::from_millis(50),
            table,
        )
        .await
        .unwrap();

    assert_eq!(report.reason, ExitReason::TimedOut);
    assert_eq!(report.dispatched, 0);
    assert!(seen.lock().unwrap().is_empty());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(100));
}

/// 测试事件先于超时到达时被分发，之后空闲超时重新计时
#[tokio::test(start_paused = true)]
async fn test_event_dispatched_then_idle_timeout_restarts() {
    let (mux, _) = multiplexer();
    let (table, seen) = recording_table("ticks");
    let (tx, rx) = mpsc::channel(1);
    let producer = tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        tx.send(7u32).await.unwrap();
        // 保持发送端存活，事件源不会耗尽
        sleep(Duration::from_secs(60)).await;
        drop(tx);
    });

    let start = Instant::now();
    let report = mux
        .start(
            vec![EventSource::from_receiver("ticks", rx)],
            CancellationToken::new(),
            Duration::from_millis(200),
            table,
        )
        .await
        .unwrap();

    assert_eq!(report.reason, ExitReason::TimedOut);
    assert_eq!(report.dispatched, 1);
    assert_eq!(*seen.lock().unwrap(), vec![7]);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(350));
    producer.abort();
}

/// 测试取消后不再分发任何事件
#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_dispatch() {
    let (mux, metrics) = multiplexer();
    let (table, seen) = recording_table("slow");
    let source = EventSource::once("slow", async {
        sleep(Duration::from_millis(100)).await;
        1u32
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let report = mux
        .start(vec![source], cancel, Duration::from_secs(5), table)
        .await
        .unwrap();

    assert_eq!(report.reason, ExitReason::Cancelled);
    assert_eq!(report.dispatched, 0);

    sleep(Duration::from_millis(200)).await;
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(mux.state(), MultiplexerState::Exited);
    assert_eq!(metrics.request_count("mux", "multiplexer", "exit", "cancelled"), 1);
}

/// 测试已取消的令牌优先于已就绪的事件源
#[tokio::test(start_paused = true)]
async fn test_pre_cancelled_token_wins_over_ready_source() {
    let (mux, _) = multiplexer();
    let (table, seen) = recording_table("ready");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = mux
        .start(
            vec![EventSource::once("ready", async { 1u32 })],
            cancel,
            Duration::from_secs(1),
            table,
        )
        .await
        .unwrap();

    assert_eq!(report.reason, ExitReason::Cancelled);
    assert!(seen.lock().unwrap().is_empty());
}

/// 测试多个事件源的事件都被分发到各自的处理器，全部关闭后退出
#[tokio::test(start_paused = true)]
async fn test_multiple_sources_until_exhausted() {
    let (mux, _) = multiplexer();
    let evens = Arc::new(Mutex::new(Vec::new()));
    let odds = Arc::new(Mutex::new(Vec::new()));
    let (e, o) = (evens.clone(), odds.clone());
    let table = DispatchTable::new()
        .on("evens", move |v: u32| {
            e.lock().unwrap().push(v);
            Ok(())
        })
        .on("odds", move |v: u32| {
            o.lock().unwrap().push(v);
            Ok(())
        });

    let (even_tx, even_rx) = mpsc::unbounded_channel();
    let (odd_tx, odd_rx) = mpsc::unbounded_channel();
    for i in 0..6u32 {
        if i % 2 == 0 {
            even_tx.send(i).unwrap();
        } else {
            odd_tx.send(i).unwrap();
        }
    }
    drop(even_tx);
    drop(odd_tx);

    let report = mux
        .start(
            vec![
                EventSource::from_unbounded("evens", even_rx),
                EventSource::from_unbounded("odds", odd_rx),
            ],
            CancellationToken::new(),
            Duration::from_secs(1),
            table,
        )
        .await
        .unwrap();

    assert_eq!(report.reason, ExitReason::Exhausted);
    assert_eq!(report.dispatched, 6);
    assert_eq!(*evens.lock().unwrap(), vec![0, 2, 4]);
    assert_eq!(*odds.lock().unwrap(), vec![1, 3, 5]);
}

/// 测试处理器失败默认只记录，循环继续
#[tokio::test(start_paused = true)]
async fn test_handler_error_logged_and_continues() {
    let (mux, metrics) = multiplexer();
    let table = DispatchTable::new().on("jobs", |v: u32| {
        if v == 2 {
            Err("job 2 rejected".into())
        } else {
            Ok(())
        }
    });
    let events = futures::stream::iter(vec![1u32, 2, 3]);

    let report = mux
        .start(
            vec![EventSource::from_stream("jobs", events)],
            CancellationToken::new(),
            Duration::from_secs(1),
            table,
        )
        .await
        .unwrap();

    assert_eq!(report.reason, ExitReason::Exhausted);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.handler_failures, 1);
    assert_eq!(metrics.request_count("mux", "multiplexer", "jobs", "failure"), 1);
}

/// 测试通过订阅观察状态变化
#[tokio::test(start_paused = true)]
async fn test_state_observable_through_subscription() {
    setup_logging();
    let config = MultiplexerConfig {
        idle_timeout_ms: 50,
        ..Default::default()
    };
    let (mux, idle) = EventMultiplexer::from_config("observed", &config, Arc::new(Metrics::new()));
    let mut states = mux.subscribe();
    assert_eq!(*states.borrow(), MultiplexerState::Waiting);

    let (_tx, rx) = mpsc::channel::<u32>(1);
    let (table, _) = recording_table("quiet");
    let report = mux
        .start(
            vec![EventSource::from_receiver("quiet", rx)],
            CancellationToken::new(),
            idle,
            table,
        )
        .await
        .unwrap();

    assert_eq!(report.reason, ExitReason::TimedOut);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), MultiplexerState::Exited);
}

/// 测试同一个多路复用器可以多次激活
#[tokio::test(start_paused = true)]
async fn test_reactivation_after_exit() {
    let (mux, _) = multiplexer();
    for round in 0..2u32 {
        let (table, seen) = recording_table("round");
        let report = mux
            .start(
                vec![EventSource::once("round", async move { round })],
                CancellationToken::new(),
                Duration::from_secs(1),
                table,
            )
            .await
            .unwrap();
        assert_eq!(report.reason, ExitReason::Exhausted);
        assert_eq!(*seen.lock().unwrap(), vec![round]);
    }
}
