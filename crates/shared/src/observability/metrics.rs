//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现进程内指标收集，
//! 由调用方决定何时渲染快照。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 安装全局 recorder，重复调用返回已安装的 handle
pub fn init(service_name: &str) -> Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_rule_metrics(service_name);

    Ok(handle)
}

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// 渲染当前指标快照
pub fn render() -> Option<String> {
    get_handle().map(PrometheusHandle::render)
}

fn register_rule_metrics(service_name: &str) {
    metrics::describe_counter!("rule_evaluations_total", "Total number of rule evaluations");
    metrics::describe_counter!("rule_matches_total", "Total number of matched rules");
    metrics::describe_counter!(
        "rule_evaluation_failures_total",
        "Total number of rule evaluations that failed closed"
    );
    metrics::describe_counter!(
        "unknown_leaf_type_total",
        "Total number of leaves without a registered evaluator"
    );
    metrics::describe_histogram!(
        "rule_evaluation_duration_seconds",
        "Rule evaluation duration in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录单条规则评估
#[inline]
pub fn record_rule_evaluation(matched: bool, duration_secs: f64) {
    metrics::counter!(
        "rule_evaluations_total",
        "matched" => matched.to_string()
    )
    .increment(1);

    if matched {
        metrics::counter!("rule_matches_total").increment(1);
    }

    metrics::histogram!("rule_evaluation_duration_seconds").record(duration_secs);
}

/// 记录评估失败（按不匹配处理）
#[inline]
pub fn record_rule_failure(error_code: &str) {
    metrics::counter!(
        "rule_evaluation_failures_total",
        "code" => error_code.to_string()
    )
    .increment(1);
}

/// 记录未注册的条件类型
#[inline]
pub fn record_unknown_leaf_type(kind: &str) {
    metrics::counter!(
        "unknown_leaf_type_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_rule_evaluation(true, 0.01);
        record_rule_evaluation(false, 0.02);
        record_rule_failure("FIELD_NOT_FOUND");
        record_unknown_leaf_type("weather");
    }
}
