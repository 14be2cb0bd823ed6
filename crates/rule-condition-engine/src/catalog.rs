//! 内置条件目录
//!
//! 订单来源、订单金额、买家自定义字段、预约星期、预约时间、服务提供方。

use crate::comparator::ValueComparator;
use crate::context::ConditionContext;
use crate::error::{EngineError, Result};
use crate::models::LeafSpec;
use crate::operators::Operator;
use crate::registry::{LeafEvaluator, LeafValidation};
use chrono::{Datelike, SecondsFormat, Utc, Weekday};
use serde_json::Value;
use std::sync::Arc;

/// 内置求值器列表
pub fn builtin_evaluators() -> Vec<Arc<dyn LeafEvaluator>> {
    vec![
        Arc::new(OrderSourceCondition),
        Arc::new(OrderAmountCondition),
        Arc::new(BuyerFieldCondition),
        Arc::new(AppointmentDayOfWeekCondition),
        Arc::new(AppointmentTimeCondition),
        Arc::new(ProviderCondition),
    ]
}

/// 订单来源条件
pub struct OrderSourceCondition;

impl LeafEvaluator for OrderSourceCondition {
    fn kind(&self) -> &'static str {
        LeafSpec::ORDER_SOURCE
    }

    fn validate(&self, spec: &LeafSpec) -> LeafValidation {
        match spec {
            LeafSpec::OrderSource { operator, value } => {
                LeafValidation::with_errors(validate_operator_value(*operator, value))
            }
            other => wrong_kind(self.kind(), other),
        }
    }

    fn evaluate(&self, spec: &LeafSpec, context: &dyn ConditionContext) -> Result<bool> {
        match spec {
            LeafSpec::OrderSource { operator, value } => {
                ValueComparator::compare(context.order_source().as_ref(), *operator, value)
            }
            other => Err(kind_mismatch(self.kind(), other)),
        }
    }

    fn default_payload(&self) -> LeafSpec {
        LeafSpec::OrderSource {
            operator: Operator::Eq,
            value: Value::String("BUYER".to_string()),
        }
    }
}

/// 订单金额条件
pub struct OrderAmountCondition;

impl LeafEvaluator for OrderAmountCondition {
    fn kind(&self) -> &'static str {
        LeafSpec::ORDER_AMOUNT
    }

    fn validate(&self, spec: &LeafSpec) -> LeafValidation {
        match spec {
            LeafSpec::OrderAmount { operator, value } => {
                let mut errors = validate_operator_value(*operator, value);
                let numeric = match value {
                    Value::Array(bounds) => bounds.iter().all(Value::is_number),
                    Value::Null => true,
                    other => other.is_number(),
                };
                if !numeric {
                    errors.push("订单金额条件的比较值必须为数字".to_string());
                }
                LeafValidation::with_errors(errors)
            }
            other => wrong_kind(self.kind(), other),
        }
    }

    fn evaluate(&self, spec: &LeafSpec, context: &dyn ConditionContext) -> Result<bool> {
        match spec {
            LeafSpec::OrderAmount { operator, value } => {
                ValueComparator::compare(context.order_amount().as_ref(), *operator, value)
            }
            other => Err(kind_mismatch(self.kind(), other)),
        }
    }

    fn default_payload(&self) -> LeafSpec {
        LeafSpec::OrderAmount {
            operator: Operator::Gte,
            value: Value::from(0),
        }
    }
}

/// 买家自定义字段条件
///
/// 字段被商户删除后上下文中将不再存在，此时返回 `FieldNotFound`，
/// 由规则管道将整条规则判为不匹配。
pub struct BuyerFieldCondition;

impl LeafEvaluator for BuyerFieldCondition {
    fn kind(&self) -> &'static str {
        LeafSpec::BUYER_FIELD
    }

    fn validate(&self, spec: &LeafSpec) -> LeafValidation {
        match spec {
            LeafSpec::BuyerField {
                field,
                operator,
                value,
            } => {
                let mut errors = Vec::new();
                if field.trim().is_empty() {
                    errors.push("买家字段名不能为空".to_string());
                }
                errors.extend(validate_operator_value(*operator, value));
                LeafValidation::with_errors(errors)
            }
            other => wrong_kind(self.kind(), other),
        }
    }

    fn evaluate(&self, spec: &LeafSpec, context: &dyn ConditionContext) -> Result<bool> {
        match spec {
            LeafSpec::BuyerField {
                field,
                operator,
                value,
            } => {
                let actual = context.buyer_field(field);
                if actual.is_none() && !operator.is_unary() {
                    return Err(EngineError::FieldNotFound(format!("buyer.{}", field)));
                }
                ValueComparator::compare(actual.as_ref(), *operator, value)
            }
            other => Err(kind_mismatch(self.kind(), other)),
        }
    }

    fn default_payload(&self) -> LeafSpec {
        LeafSpec::BuyerField {
            field: String::new(),
            operator: Operator::Eq,
            value: Value::Null,
        }
    }
}

/// 预约星期条件（按 UTC 日期判定）
pub struct AppointmentDayOfWeekCondition;

impl LeafEvaluator for AppointmentDayOfWeekCondition {
    fn kind(&self) -> &'static str {
        LeafSpec::APPOINTMENT_DAY_OF_WEEK
    }

    fn validate(&self, spec: &LeafSpec) -> LeafValidation {
        match spec {
            LeafSpec::AppointmentDayOfWeek { days } if days.is_empty() => {
                LeafValidation::with_errors(vec!["至少选择一个星期".to_string()])
            }
            LeafSpec::AppointmentDayOfWeek { .. } => LeafValidation::ok(),
            other => wrong_kind(self.kind(), other),
        }
    }

    fn evaluate(&self, spec: &LeafSpec, context: &dyn ConditionContext) -> Result<bool> {
        match spec {
            LeafSpec::AppointmentDayOfWeek { days } => Ok(context
                .appointment_start()
                .is_some_and(|start| days.contains(&start.weekday()))),
            other => Err(kind_mismatch(self.kind(), other)),
        }
    }

    fn default_payload(&self) -> LeafSpec {
        LeafSpec::AppointmentDayOfWeek {
            days: vec![Weekday::Sat, Weekday::Sun],
        }
    }
}

/// 预约开始时间条件
pub struct AppointmentTimeCondition;

impl LeafEvaluator for AppointmentTimeCondition {
    fn kind(&self) -> &'static str {
        LeafSpec::APPOINTMENT_TIME
    }

    fn validate(&self, spec: &LeafSpec) -> LeafValidation {
        match spec {
            LeafSpec::AppointmentTime { operator, value } => {
                let mut errors = validate_operator_value(*operator, value);
                if !matches!(
                    operator,
                    Operator::Before | Operator::After | Operator::Between | Operator::Eq
                ) {
                    errors.push(format!("预约时间条件不支持 {} 操作符", operator));
                }
                let times: Vec<&Value> = match value {
                    Value::Array(bounds) => bounds.iter().collect(),
                    other => vec![other],
                };
                if times
                    .iter()
                    .any(|t| ValueComparator::parse_datetime(t).is_err())
                {
                    errors.push("预约时间必须为 RFC 3339 时间或 YYYY-MM-DD 日期".to_string());
                }
                LeafValidation::with_errors(errors)
            }
            other => wrong_kind(self.kind(), other),
        }
    }

    fn evaluate(&self, spec: &LeafSpec, context: &dyn ConditionContext) -> Result<bool> {
        match spec {
            LeafSpec::AppointmentTime { operator, value } => {
                let start = context
                    .appointment_start()
                    .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)));
                ValueComparator::compare(start.as_ref(), *operator, value)
            }
            other => Err(kind_mismatch(self.kind(), other)),
        }
    }

    fn default_payload(&self) -> LeafSpec {
        LeafSpec::AppointmentTime {
            operator: Operator::After,
            value: Value::String(Utc::now().date_naive().to_string()),
        }
    }
}

/// 服务提供方条件
pub struct ProviderCondition;

impl LeafEvaluator for ProviderCondition {
    fn kind(&self) -> &'static str {
        LeafSpec::PROVIDER
    }

    fn validate(&self, spec: &LeafSpec) -> LeafValidation {
        match spec {
            LeafSpec::Provider { provider_ids } if provider_ids.is_empty() => {
                LeafValidation::with_errors(vec!["至少选择一个服务提供方".to_string()])
            }
            LeafSpec::Provider { .. } => LeafValidation::ok(),
            other => wrong_kind(self.kind(), other),
        }
    }

    fn evaluate(&self, spec: &LeafSpec, context: &dyn ConditionContext) -> Result<bool> {
        match spec {
            LeafSpec::Provider { provider_ids } => Ok(context
                .provider_id()
                .is_some_and(|id| provider_ids.iter().any(|candidate| *candidate == id))),
            other => Err(kind_mismatch(self.kind(), other)),
        }
    }

    fn default_payload(&self) -> LeafSpec {
        LeafSpec::Provider {
            provider_ids: Vec::new(),
        }
    }
}

/// 校验操作符与比较值是否兼容
fn validate_operator_value(operator: Operator, value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    match operator {
        Operator::Between => match value.as_array() {
            Some(bounds) if bounds.len() == 2 => {}
            Some(bounds) => errors.push(format!(
                "between 操作符需要 [min, max] 数组，当前有 {} 个元素",
                bounds.len()
            )),
            None => errors.push("between 操作符需要 [min, max] 数组".to_string()),
        },
        Operator::In | Operator::NotIn => {
            if !value.is_array() {
                errors.push(format!("{} 操作符需要数组值", operator));
            }
        }
        Operator::Regex => match value.as_str() {
            Some(pattern) => {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(format!("正则表达式无效: {}", e));
                }
            }
            None => errors.push("regex 操作符需要字符串值".to_string()),
        },
        Operator::IsEmpty | Operator::IsNotEmpty => {}
        _ => {
            if value.is_null() {
                errors.push(format!("{} 操作符缺少比较值", operator));
            }
        }
    }
    errors
}

fn wrong_kind(expected: &str, spec: &LeafSpec) -> LeafValidation {
    LeafValidation::with_errors(vec![kind_mismatch(expected, spec).to_string()])
}

fn kind_mismatch(expected: &str, spec: &LeafSpec) -> EngineError {
    EngineError::InvalidPayload(format!("{} 求值器收到 {} 条件", expected, spec.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MockConditionContext;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_order_source() {
        let mut ctx = MockConditionContext::new();
        ctx.expect_order_source().returning(|| Some(json!("BUYER")));

        let spec = LeafSpec::OrderSource {
            operator: Operator::In,
            value: json!(["BUYER", "IMPORT"]),
        };
        assert!(OrderSourceCondition.evaluate(&spec, &ctx).unwrap());
    }

    #[test]
    fn test_order_amount_missing_is_false() {
        let mut ctx = MockConditionContext::new();
        ctx.expect_order_amount().returning(|| None);

        let spec = LeafSpec::OrderAmount {
            operator: Operator::Gt,
            value: json!(100),
        };
        assert!(!OrderAmountCondition.evaluate(&spec, &ctx).unwrap());
    }

    #[test]
    fn test_buyer_field_missing_is_error() {
        let mut ctx = MockConditionContext::new();
        ctx.expect_buyer_field()
            .withf(|name| name == "membership")
            .returning(|_| None);

        let spec = LeafSpec::BuyerField {
            field: "membership".to_string(),
            operator: Operator::Eq,
            value: json!("gold"),
        };
        let result = BuyerFieldCondition.evaluate(&spec, &ctx);
        assert!(matches!(result, Err(EngineError::FieldNotFound(f)) if f == "buyer.membership"));
    }

    #[test]
    fn test_buyer_field_is_empty_tolerates_missing() {
        let mut ctx = MockConditionContext::new();
        ctx.expect_buyer_field().returning(|_| None);

        let spec = LeafSpec::BuyerField {
            field: "notes".to_string(),
            operator: Operator::IsEmpty,
            value: Value::Null,
        };
        assert!(BuyerFieldCondition.evaluate(&spec, &ctx).unwrap());
    }

    #[test]
    fn test_appointment_day_of_week() {
        let mut ctx = MockConditionContext::new();
        // 2024-06-01 是星期六
        ctx.expect_appointment_start()
            .returning(|| Some(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));

        let weekend = AppointmentDayOfWeekCondition.default_payload();
        assert!(AppointmentDayOfWeekCondition.evaluate(&weekend, &ctx).unwrap());

        let weekdays = LeafSpec::AppointmentDayOfWeek {
            days: vec![Weekday::Mon, Weekday::Tue],
        };
        assert!(!AppointmentDayOfWeekCondition.evaluate(&weekdays, &ctx).unwrap());
    }

    #[test]
    fn test_appointment_time_between() {
        let mut ctx = MockConditionContext::new();
        ctx.expect_appointment_start()
            .returning(|| Some(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));

        let spec = LeafSpec::AppointmentTime {
            operator: Operator::Between,
            value: json!(["2024-06-01T08:00:00Z", "2024-06-01T10:00:00Z"]),
        };
        assert!(AppointmentTimeCondition.validate(&spec).is_valid());
        assert!(AppointmentTimeCondition.evaluate(&spec, &ctx).unwrap());
    }

    #[test]
    fn test_provider() {
        let mut ctx = MockConditionContext::new();
        ctx.expect_provider_id().returning(|| Some("prov-7".to_string()));

        let spec = LeafSpec::Provider {
            provider_ids: vec!["prov-1".to_string(), "prov-7".to_string()],
        };
        assert!(ProviderCondition.evaluate(&spec, &ctx).unwrap());
        assert!(!ProviderCondition.validate(&ProviderCondition.default_payload()).is_valid());
    }

    #[test]
    fn test_validation_messages() {
        let between = LeafSpec::OrderAmount {
            operator: Operator::Between,
            value: json!([1]),
        };
        let validation = OrderAmountCondition.validate(&between);
        assert!(!validation.is_valid());
        assert!(validation.errors[0].contains("1 个元素"));

        let regex = LeafSpec::BuyerField {
            field: "code".to_string(),
            operator: Operator::Regex,
            value: json!("[invalid"),
        };
        assert!(!BuyerFieldCondition.validate(&regex).is_valid());

        let unnamed = BuyerFieldCondition.default_payload();
        assert!(!BuyerFieldCondition.validate(&unnamed).is_valid());
    }

    #[test]
    fn test_wrong_kind_is_payload_error() {
        let ctx = MockConditionContext::new();
        let spec = LeafSpec::Provider {
            provider_ids: vec![],
        };
        let result = OrderSourceCondition.evaluate(&spec, &ctx);
        assert!(matches!(result, Err(EngineError::InvalidPayload(_))));
    }
}
