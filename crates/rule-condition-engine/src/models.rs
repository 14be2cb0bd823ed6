//! 规则条件引擎领域模型
//!
//! 条件树以扁平的 `ConditionNode` 列表持久化，分组结构由路径前缀隐式表达。

use crate::operators::{LogicalOperator, Operator};
use crate::path::PathKey;
use chrono::{DateTime, Utc, Weekday};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// 条件节点标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 条件节点：持久化的最小单元
///
/// `logic` 描述的是与同一父前缀下所有兄弟节点的连接方式，
/// 扁平存储导致每个兄弟节点都冗余保存一份，由 `GroupEditor` 保证一致。
/// `payload` 为 `None` 表示刚插入、尚未选择条件类型的占位节点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionNode {
    pub id: NodeId,
    pub path: PathKey,
    #[serde(default)]
    pub logic: LogicalOperator,
    #[serde(default)]
    pub payload: Option<LeafSpec>,
}

impl ConditionNode {
    pub fn new(path: impl Into<PathKey>, logic: LogicalOperator, payload: LeafSpec) -> Self {
        Self {
            id: NodeId::new(),
            path: path.into(),
            logic,
            payload: Some(payload),
        }
    }

    /// 创建待配置的占位节点
    pub fn placeholder(path: impl Into<PathKey>, logic: LogicalOperator) -> Self {
        Self {
            id: NodeId::new(),
            path: path.into(),
            logic,
            payload: None,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.payload.is_none()
    }
}

/// 叶子条件配置
///
/// 以 `type` 字段区分条件类型，引擎只根据类型标签查找对应的求值器。
/// 无法识别的类型标签反序列化为 `Unrecognized`，保留原始标签和内容，
/// 求值时按未注册类型处理，再次序列化时原样写回。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", tag = "type", rename_all = "snake_case")]
pub enum LeafSpec {
    /// 订单来源（如 BUYER / VENDOR / IMPORT）
    OrderSource {
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
    /// 订单金额
    OrderAmount {
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
    /// 买家自定义字段
    BuyerField {
        field: String,
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
    /// 预约日期落在指定星期
    AppointmentDayOfWeek { days: Vec<Weekday> },
    /// 预约开始时间
    AppointmentTime {
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
    /// 服务提供方
    Provider { provider_ids: Vec<String> },
    #[serde(skip)]
    Unrecognized { kind: String, raw: Value },
}

impl LeafSpec {
    pub const ORDER_SOURCE: &'static str = "order_source";
    pub const ORDER_AMOUNT: &'static str = "order_amount";
    pub const BUYER_FIELD: &'static str = "buyer_field";
    pub const APPOINTMENT_DAY_OF_WEEK: &'static str = "appointment_day_of_week";
    pub const APPOINTMENT_TIME: &'static str = "appointment_time";
    pub const PROVIDER: &'static str = "provider";

    const KNOWN_KINDS: [&'static str; 6] = [
        Self::ORDER_SOURCE,
        Self::ORDER_AMOUNT,
        Self::BUYER_FIELD,
        Self::APPOINTMENT_DAY_OF_WEEK,
        Self::APPOINTMENT_TIME,
        Self::PROVIDER,
    ];

    /// 类型标签，与序列化后的 `type` 字段一致
    pub fn kind(&self) -> &str {
        match self {
            Self::OrderSource { .. } => Self::ORDER_SOURCE,
            Self::OrderAmount { .. } => Self::ORDER_AMOUNT,
            Self::BuyerField { .. } => Self::BUYER_FIELD,
            Self::AppointmentDayOfWeek { .. } => Self::APPOINTMENT_DAY_OF_WEEK,
            Self::AppointmentTime { .. } => Self::APPOINTMENT_TIME,
            Self::Provider { .. } => Self::PROVIDER,
            Self::Unrecognized { kind, .. } => kind,
        }
    }
}

impl Serialize for LeafSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unrecognized { raw, .. } => raw.serialize(serializer),
            known => LeafSpec::serialize(known, serializer),
        }
    }
}

impl<'de> Deserialize<'de> for LeafSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::missing_field("type"))?
            .to_string();

        if Self::KNOWN_KINDS.contains(&kind.as_str()) {
            LeafSpec::deserialize(raw).map_err(D::Error::custom)
        } else {
            Ok(Self::Unrecognized { kind, raw })
        }
    }
}

impl fmt::Display for LeafSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderSource { operator, value } => write!(f, "order_source {} {}", operator, value),
            Self::OrderAmount { operator, value } => write!(f, "order_amount {} {}", operator, value),
            Self::BuyerField {
                field,
                operator,
                value,
            } => write!(f, "buyer.{} {} {}", field, operator, value),
            Self::AppointmentDayOfWeek { days } => write!(f, "appointment_day in {:?}", days),
            Self::AppointmentTime { operator, value } => {
                write!(f, "appointment_time {} {}", operator, value)
            }
            Self::Provider { provider_ids } => write!(f, "provider in {:?}", provider_ids),
            Self::Unrecognized { kind, .. } => write!(f, "{} (unrecognized)", kind),
        }
    }
}

/// 规则动作
///
/// 引擎不解释动作内容，命中后原样返回给调用方执行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub config: Value,
}

impl ActionSpec {
    pub fn new(action_type: impl Into<String>, config: Value) -> Self {
        Self {
            action_type: action_type.into(),
            config,
        }
    }
}

/// 规则定义
///
/// 规则归属于单个商户（member），被替换时归档而不是删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_id: String,
    pub nodes: Vec<ConditionNode>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Rule {
    pub fn new(
        member_id: impl Into<String>,
        name: impl Into<String>,
        nodes: Vec<ConditionNode>,
        actions: Vec<ActionSpec>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            member_id: member_id.into(),
            nodes,
            actions,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    /// 规则在指定时间点是否生效
    ///
    /// `created_at <= as_of` 且未归档或归档时间不早于 `as_of`。
    pub fn is_active_at(&self, as_of: DateTime<Utc>) -> bool {
        self.created_at <= as_of && self.archived_at.is_none_or(|archived| archived >= as_of)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}
