//! 分层配置
//!
//! toml 文件提供默认值，环境变量覆盖部署差异。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::observability::ObservabilityConfig;

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// 拒绝删除规则的最后一个条件
    pub keep_last_root_condition: bool,
    /// 删除后只剩一个叶子的子分组是否解除嵌套
    pub unwrap_single_leaf_groups: bool,
    /// 不允许删除的根层序号（系统预置条件）
    pub locked_root_slots: Vec<usize>,
    /// 是否记录详细评估追踪
    pub trace_evaluation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            keep_last_root_condition: true,
            unwrap_single_leaf_groups: false,
            locked_root_slots: Vec::new(),
            trace_evaluation: false,
        }
    }
}

/// 命令行和嵌入方共用的顶层配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub observability: ObservabilityConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// 依次叠加 `default`、`{RULES_ENV}`、`{service_name}` 三个 toml 文件和 `RULES_` 环境变量
    ///
    /// 文件都是可选的，目录由 `CONFIG_DIR` 指定。环境变量用双下划线表示层级，
    /// 例如 `RULES_ENGINE__LOCKED_ROOT_SLOTS=0,1`。
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let environment = std::env::var("RULES_ENV").unwrap_or_else(|_| "development".to_string());
        let dir = PathBuf::from(std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string()));

        let mut builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", environment.as_str())?;

        for layer in ["default", environment.as_str(), service_name] {
            builder = builder.add_source(File::from(dir.join(format!("{layer}.toml"))).required(false));
        }

        builder
            .add_source(
                Environment::with_prefix("RULES")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.locked_root_slots")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
