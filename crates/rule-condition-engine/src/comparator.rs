//! 值比较器
//!
//! 叶子条件目录中的数值、字符串、时间比较都落在这里。

use crate::error::{EngineError, Result};
use crate::operators::Operator;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::LazyLock;

/// 已编译的正则表达式，按模式文本缓存
static PATTERNS: LazyLock<DashMap<String, Regex>> = LazyLock::new(DashMap::new);

/// 缓存上限，超过后整体清空
const PATTERN_CACHE_LIMIT: usize = 1024;

/// 值比较器
pub struct ValueComparator;

impl ValueComparator {
    /// 比较上下文中的实际值与条件中的期望值
    ///
    /// 实际值缺失时，除空值检查外一律返回 false。
    pub fn compare(actual: Option<&Value>, operator: Operator, expected: &Value) -> Result<bool> {
        let actual = match (operator, actual) {
            (Operator::IsEmpty, value) => return Ok(Self::is_empty(value)),
            (Operator::IsNotEmpty, value) => return Ok(!Self::is_empty(value)),
            (_, None) => return Ok(false),
            (_, Some(value)) => value,
        };

        match operator {
            Operator::Eq => Ok(Self::loose_eq(actual, expected)),
            Operator::Neq => Ok(!Self::loose_eq(actual, expected)),
            Operator::Gt => Self::ordering(actual, expected).map(|o| o == Ordering::Greater),
            Operator::Gte => Self::ordering(actual, expected).map(|o| o != Ordering::Less),
            Operator::Lt => Self::ordering(actual, expected).map(|o| o == Ordering::Less),
            Operator::Lte => Self::ordering(actual, expected).map(|o| o != Ordering::Greater),
            Operator::Between => Self::between(actual, expected),
            Operator::In => Self::in_list(actual, expected),
            Operator::NotIn => Self::in_list(actual, expected).map(|found| !found),
            Operator::Contains => Self::contains(actual, expected),
            Operator::StartsWith => {
                Self::str_pair(actual, expected).map(|(s, prefix)| s.starts_with(prefix))
            }
            Operator::EndsWith => {
                Self::str_pair(actual, expected).map(|(s, suffix)| s.ends_with(suffix))
            }
            Operator::Regex => Self::regex_match(actual, expected),
            Operator::Before => Ok(Self::parse_datetime(actual)? < Self::parse_datetime(expected)?),
            Operator::After => Ok(Self::parse_datetime(actual)? > Self::parse_datetime(expected)?),
            Operator::IsEmpty | Operator::IsNotEmpty => Ok(false),
        }
    }

    fn is_empty(value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(arr)) => arr.is_empty(),
            Some(Value::Object(obj)) => obj.is_empty(),
            _ => false,
        }
    }

    /// 相等比较，数值统一按浮点数比较（100 == 100.0）
    fn loose_eq(actual: &Value, expected: &Value) -> bool {
        match (Self::as_f64(actual), Self::as_f64(expected)) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => actual == expected,
        }
    }

    /// 有序比较：优先按数值，其次按时间
    fn ordering(actual: &Value, expected: &Value) -> Result<Ordering> {
        if let (Some(a), Some(b)) = (Self::as_f64(actual), Self::as_f64(expected)) {
            return a.partial_cmp(&b).ok_or_else(|| Self::mismatch("comparable number", actual));
        }
        let a = Self::parse_datetime(actual)?;
        let b = Self::parse_datetime(expected)?;
        Ok(a.cmp(&b))
    }

    /// 范围比较，期望值为 [min, max] 数组（闭区间）
    fn between(actual: &Value, expected: &Value) -> Result<bool> {
        let bounds = expected
            .as_array()
            .filter(|arr| arr.len() == 2)
            .ok_or_else(|| Self::mismatch("array [min, max]", expected))?;

        let above_min = Self::ordering(actual, &bounds[0])? != Ordering::Less;
        let below_max = Self::ordering(actual, &bounds[1])? != Ordering::Greater;
        Ok(above_min && below_max)
    }

    fn in_list(actual: &Value, expected: &Value) -> Result<bool> {
        let options = expected
            .as_array()
            .ok_or_else(|| Self::mismatch("array", expected))?;
        Ok(options.iter().any(|option| Self::loose_eq(actual, option)))
    }

    /// 字符串子串或数组元素包含
    fn contains(actual: &Value, expected: &Value) -> Result<bool> {
        match actual {
            Value::String(s) => {
                let needle = expected
                    .as_str()
                    .ok_or_else(|| Self::mismatch("string", expected))?;
                Ok(s.contains(needle))
            }
            Value::Array(items) => Ok(items.iter().any(|item| Self::loose_eq(item, expected))),
            _ => Err(Self::mismatch("string or array", actual)),
        }
    }

    fn regex_match(actual: &Value, expected: &Value) -> Result<bool> {
        let (s, pattern) = Self::str_pair(actual, expected)?;
        Ok(Self::compiled(pattern)?.is_match(s))
    }

    fn compiled(pattern: &str) -> Result<Regex> {
        if let Some(regex) = PATTERNS.get(pattern) {
            return Ok(regex.value().clone());
        }

        let regex = Regex::new(pattern).map_err(|e| {
            EngineError::InvalidPayload(format!("无效的正则表达式 '{}': {}", pattern, e))
        })?;
        if PATTERNS.len() >= PATTERN_CACHE_LIMIT {
            PATTERNS.clear();
        }
        PATTERNS.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }

    fn str_pair<'a>(actual: &'a Value, expected: &'a Value) -> Result<(&'a str, &'a str)> {
        let s = actual
            .as_str()
            .ok_or_else(|| Self::mismatch("string", actual))?;
        let other = expected
            .as_str()
            .ok_or_else(|| Self::mismatch("string", expected))?;
        Ok((s, other))
    }

    /// 解析 RFC 3339 时间或纯日期（按 UTC 零点）
    pub(crate) fn parse_datetime(value: &Value) -> Result<DateTime<Utc>> {
        let s = value
            .as_str()
            .ok_or_else(|| Self::mismatch("datetime string", value))?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| EngineError::ParseError(format!("无法解析日期时间: '{}'", s)))
    }

    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn mismatch(expected: &str, actual: &Value) -> EngineError {
        EngineError::TypeMismatch {
            expected: expected.to_string(),
            actual: Self::type_name(actual).to_string(),
        }
    }

    pub(crate) fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}
