//! 操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 叶子条件中实际值与期望值的比较方式
///
/// 序列化名称与 `Display` 输出一致，均为 snake_case。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// 期望值为 `[min, max]`，两端包含
    Between,
    /// 实际值出现在期望数组中
    In,
    NotIn,
    /// 字符串子串或数组元素
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    /// 时间早于期望值（RFC 3339 或日期）
    Before,
    After,
    /// 缺失、null、空字符串或空数组
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    pub const ALL: [Operator; 17] = [
        Self::Eq,
        Self::Neq,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Between,
        Self::In,
        Self::NotIn,
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Regex,
        Self::Before,
        Self::After,
        Self::IsEmpty,
        Self::IsNotEmpty,
    ];

    /// 期望值必须是数组
    pub fn expects_array(&self) -> bool {
        matches!(self, Self::Between | Self::In | Self::NotIn)
    }

    /// 不读取期望值
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsEmpty | Self::IsNotEmpty)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Regex => "regex",
            Self::Before => "before",
            Self::After => "after",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 同级节点之间的连接逻辑
///
/// 持久化在每个直接叶子上；空分组默认 `And`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    /// 空分组的求值结果（AND 的单位元为 true，OR 的单位元为 false）
    pub fn identity(&self) -> bool {
        matches!(self, Self::And)
    }

    pub fn flip(&self) -> Self {
        match self {
            Self::And => Self::Or,
            Self::Or => Self::And,
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if *self == Self::And { "AND" } else { "OR" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_identity() {
        assert!(LogicalOperator::And.identity());
        assert!(!LogicalOperator::Or.identity());
        assert_eq!(LogicalOperator::And.flip(), LogicalOperator::Or);
        assert_eq!(LogicalOperator::default(), LogicalOperator::And);
    }

    #[test]
    fn test_operator_serde() {
        let op: Operator = serde_json::from_str("\"not_in\"").unwrap();
        assert_eq!(op, Operator::NotIn);
        assert_eq!(op.to_string(), "not_in");
        let logic: LogicalOperator = serde_json::from_str("\"OR\"").unwrap();
        assert_eq!(logic, LogicalOperator::Or);
    }

    #[test]
    fn test_display_matches_serialized_name() {
        for op in Operator::ALL {
            assert_eq!(serde_json::to_string(&op).unwrap(), format!("\"{}\"", op));
        }
    }
}
