//! 评估上下文
//!
//! 叶子条件求值器通过 `ConditionContext` 查询订单、预约、买家等属性，
//! 引擎本身只把上下文原样传递，不关心其数据来源。

use chrono::{DateTime, Utc};
use serde_json::Value;

/// 条件求值时可查询的业务属性
#[cfg_attr(test, mockall::automock)]
pub trait ConditionContext {
    /// 订单来源（如 "BUYER"）
    fn order_source(&self) -> Option<Value>;

    /// 订单金额
    fn order_amount(&self) -> Option<Value>;

    /// 买家自定义字段值
    fn buyer_field(&self, name: &str) -> Option<Value>;

    /// 预约开始时间
    fn appointment_start(&self) -> Option<DateTime<Utc>>;

    /// 服务提供方标识
    fn provider_id(&self) -> Option<String>;
}

/// 基于 JSON 文档的评估上下文
///
/// 约定的文档结构：
/// ```json
/// {
///   "order": {"source": "BUYER", "amount": 150},
///   "buyer": {"fields": {"membership": "gold"}},
///   "appointment": {"start": "2024-06-01T09:00:00Z"},
///   "provider": {"id": "prov-1"}
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonContext {
    data: Value,
}

impl JsonContext {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// 从 JSON 字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self { data })
    }

    /// 获取字段值（支持点号分隔的路径，如 "order.amount" 或 "order.items.0.sku"）
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        let mut current = &self.data;

        for part in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

impl ConditionContext for JsonContext {
    fn order_source(&self) -> Option<Value> {
        self.get_field("order.source").cloned()
    }

    fn order_amount(&self) -> Option<Value> {
        self.get_field("order.amount").cloned()
    }

    fn buyer_field(&self, name: &str) -> Option<Value> {
        match self.get_field("buyer.fields")? {
            Value::Object(fields) => fields.get(name).cloned(),
            _ => None,
        }
    }

    fn appointment_start(&self) -> Option<DateTime<Utc>> {
        let raw = self.get_field("appointment.start")?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn provider_id(&self) -> Option<String> {
        match self.get_field("provider.id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> JsonContext {
        JsonContext::new(json!({
            "order": {
                "source": "BUYER",
                "amount": 150,
                "items": [{"sku": "CLEAN-01"}]
            },
            "buyer": {
                "fields": {"membership": "gold", "pets": 2}
            },
            "appointment": {"start": "2024-06-01T09:00:00+02:00"},
            "provider": {"id": 42}
        }))
    }

    #[test]
    fn test_get_field() {
        let ctx = sample();
        assert_eq!(ctx.get_field("order.amount"), Some(&json!(150)));
        assert_eq!(ctx.get_field("order.items.0.sku"), Some(&json!("CLEAN-01")));
        assert_eq!(ctx.get_field("order.missing"), None);
    }

    #[test]
    fn test_named_queries() {
        let ctx = sample();
        assert_eq!(ctx.order_source(), Some(json!("BUYER")));
        assert_eq!(ctx.order_amount(), Some(json!(150)));
        assert_eq!(ctx.buyer_field("membership"), Some(json!("gold")));
        assert_eq!(ctx.buyer_field("vehicle"), None);
        assert_eq!(
            ctx.appointment_start(),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap())
        );
        assert_eq!(ctx.provider_id(), Some("42".to_string()));
    }

    #[test]
    fn test_empty_context() {
        let ctx = JsonContext::default();
        assert_eq!(ctx.order_source(), None);
        assert_eq!(ctx.appointment_start(), None);
        assert_eq!(ctx.provider_id(), None);
    }
}
