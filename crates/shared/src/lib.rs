//! 共享库
//!
//! 规则引擎各可执行程序共用的配置加载和可观测性初始化。

pub mod config;
pub mod observability;
