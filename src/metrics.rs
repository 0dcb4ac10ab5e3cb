//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了核心组件的指标收集和导出功能。

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{span, Level};

/// 指标收集器
///
/// 由组件构造时注入，不存在全局实例。多个组件可以共享同一个 `Arc<Metrics>`。
#[derive(Debug, Default)]
pub struct Metrics {
    /// 请求总数统计
    /// key: "component:layer:op:result"
    requests_total: DashMap<String, u64>,
    /// 操作耗时累计
    /// key: "component:layer:op" -> (total_duration_secs, count)
    operation_duration: DashMap<String, (f64, u64)>,
    /// 瞬时值，如缓存条目数
    gauges: DashMap<String, i64>,
}

/// 指标快照，用于 JSON 导出
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub requests_total: BTreeMap<String, u64>,
    pub operation_duration: BTreeMap<String, DurationStat>,
    pub gauges: BTreeMap<String, i64>,
}

/// 耗时统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DurationStat {
    pub total_secs: f64,
    pub count: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录请求指标
    ///
    /// # 参数
    ///
    /// * `component` - 组件实例名称
    /// * `layer` - 组件类型（cache/read_through/fan_out/multiplexer）
    /// * `op` - 操作类型
    /// * `result` - 操作结果（hit/miss/success/failure 等）
    pub fn record_request(&self, component: &str, layer: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "core_request", component, layer, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}:{}", component, layer, op, result);
        *self.requests_total.entry(key).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, component: &str, layer: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}:{}", component, layer, op);
        let mut entry = self.operation_duration.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 设置瞬时值
    pub fn set_gauge(&self, component: &str, name: &str, value: i64) {
        self.gauges.insert(format!("{}:{}", component, name), value);
    }

    /// 查询请求计数，不存在时返回0
    pub fn request_count(&self, component: &str, layer: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}:{}", component, layer, op, result);
        self.requests_total.get(&key).map(|v| *v).unwrap_or(0)
    }

    /// 查询瞬时值
    pub fn gauge(&self, component: &str, name: &str) -> Option<i64> {
        self.gauges
            .get(&format!("{}:{}", component, name))
            .map(|v| *v)
    }

    /// 生成快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self
                .requests_total
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            operation_duration: self
                .operation_duration
                .iter()
                .map(|e| {
                    let (total_secs, count) = *e.value();
                    (e.key().clone(), DurationStat { total_secs, count })
                })
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    /// 以 JSON 字符串导出
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// 将所有指标格式化为文本，用于监控系统采集
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();
        for (k, v) in &snapshot.requests_total {
            output.push_str(&format!("oxflow_requests_total{{labels=\"{}\"}} {}\n", k, v));
        }
        for (k, stat) in &snapshot.operation_duration {
            let parts: Vec<&str> = k.split(':').collect();
            if parts.len() == 3 {
                output.push_str(&format!(
                    "oxflow_operation_duration_seconds_sum{{component=\"{}\", layer=\"{}\", operation=\"{}\"}} {}\n",
                    parts[0], parts[1], parts[2], stat.total_secs
                ));
                output.push_str(&format!(
                    "oxflow_operation_duration_seconds_count{{component=\"{}\", layer=\"{}\", operation=\"{}\"}} {}\n",
                    parts[0], parts[1], parts[2], stat.count
                ));
            }
        }
        for (k, v) in &snapshot.gauges {
            output.push_str(&format!("oxflow_gauge{{name=\"{}\"}} {}\n", k, v));
        }
        output
    }
}
