//! 日志与指标初始化
//!
//! 命令行和嵌入引擎的服务都从这里完成 tracing subscriber 与 Prometheus recorder 的安装。

pub mod metrics;
pub mod tracing;

use ::tracing::{debug, info};
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人类可读，适合终端
    #[default]
    Pretty,
    /// 每行一个 JSON 对象，适合日志采集
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// EnvFilter 指令，RUST_LOG 设置时以 RUST_LOG 为准
    pub log_level: String,
    pub log_format: LogFormat,
    /// 安装进程内 recorder；关闭时指标调用为空操作
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}

/// `init` 的返回值，持有 recorder 句柄直到进程结束
pub struct ObservabilityGuard {
    metrics_handle: Option<PrometheusHandle>,
}

impl ObservabilityGuard {
    /// 不持有任何资源，测试中使用
    pub fn empty() -> Self {
        Self {
            metrics_handle: None,
        }
    }

    /// Prometheus 文本格式的指标快照，未启用指标时为 None
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics_handle.as_ref().map(PrometheusHandle::render)
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        debug!(
            metrics = self.metrics_handle.is_some(),
            "observability guard dropped"
        );
    }
}

/// 先安装日志，再安装指标 recorder
///
/// ```ignore
/// let config = rules_shared::config::AppConfig::load("rule-condition-engine")?;
/// let guard = rules_shared::observability::init(&config.service_name, &config.observability)?;
/// println!("{}", guard.render_metrics().unwrap_or_default());
/// ```
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(service_name)?)
    } else {
        None
    };

    info!(
        service = %service_name,
        log_format = ?config.log_format,
        metrics_enabled = config.metrics_enabled,
        "可观测性初始化完成"
    );

    Ok(ObservabilityGuard { metrics_handle })
}
