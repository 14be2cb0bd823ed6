//! 规则条件引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("无效的路径: {0}")]
    InvalidPath(String),

    #[error("未注册的条件类型: {0}")]
    UnknownLeafType(String),

    #[error("同级节点逻辑不一致: 分组 {group} 期望 {expected}, 实际 {actual}")]
    InconsistentSiblingLogic {
        group: String,
        expected: String,
        actual: String,
    },

    #[error("字段不存在: {0}")]
    FieldNotFound(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("条件配置无效: {0}")]
    InvalidPayload(String),

    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("分组不存在: {0}")]
    GroupNotFound(String),

    #[error("条件节点不存在: {0}")]
    NodeNotFound(String),

    #[error("分组已锁定，不允许删除: {0}")]
    LockedGroup(String),

    #[error("至少需要保留一个条件")]
    LastRootCondition,

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("规则校验失败: {rule_id} - {}", .issues.join("; "))]
    ValidationFailed { rule_id: String, issues: Vec<String> },

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::UnknownLeafType(_) => "UNKNOWN_LEAF_TYPE",
            Self::InconsistentSiblingLogic { .. } => "INCONSISTENT_SIBLING_LOGIC",
            Self::FieldNotFound(_) => "FIELD_NOT_FOUND",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::GroupNotFound(_) => "GROUP_NOT_FOUND",
            Self::NodeNotFound(_) => "NODE_NOT_FOUND",
            Self::LockedGroup(_) => "LOCKED_GROUP",
            Self::LastRootCondition => "LAST_ROOT_CONDITION",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }

    /// 是否为编辑操作被策略拒绝（而非数据错误）
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::LockedGroup(_) | Self::LastRootCondition)
    }
}
