//! 叶子条件注册表
//!
//! 按 `LeafSpec` 的类型标签查找求值器。引擎求值时只调用 `evaluate`，
//! `validate` 和 `default_payload` 供规则编辑界面使用。

use crate::context::ConditionContext;
use crate::error::{EngineError, Result};
use crate::models::LeafSpec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 叶子条件配置校验结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafValidation {
    pub errors: Vec<String>,
}

impl LeafValidation {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_errors(errors: Vec<String>) -> Self {
        Self { errors }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 单一条件类型的求值器
pub trait LeafEvaluator: Send + Sync {
    /// 对应 `LeafSpec::kind()` 的类型标签
    fn kind(&self) -> &'static str;

    fn validate(&self, spec: &LeafSpec) -> LeafValidation;

    /// 判定条件是否满足，上下文必须只读访问
    fn evaluate(&self, spec: &LeafSpec, context: &dyn ConditionContext) -> Result<bool>;

    /// 新建该类型条件时的默认配置
    fn default_payload(&self) -> LeafSpec;
}

/// 类型标签到求值器的映射
#[derive(Clone, Default)]
pub struct LeafRegistry {
    evaluators: HashMap<&'static str, Arc<dyn LeafEvaluator>>,
}

impl LeafRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含内置条件目录的注册表
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for evaluator in crate::catalog::builtin_evaluators() {
            registry.register_arc(evaluator);
        }
        registry
    }

    /// 注册求值器，返回被替换的旧求值器
    pub fn register<E>(&mut self, evaluator: E) -> Option<Arc<dyn LeafEvaluator>>
    where
        E: LeafEvaluator + 'static,
    {
        self.register_arc(Arc::new(evaluator))
    }

    pub fn register_arc(&mut self, evaluator: Arc<dyn LeafEvaluator>) -> Option<Arc<dyn LeafEvaluator>> {
        self.evaluators.insert(evaluator.kind(), evaluator)
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn LeafEvaluator>> {
        self.evaluators.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.evaluators.contains_key(kind)
    }

    /// 已注册的类型标签（排序后）
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.evaluators.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// 求值单个叶子条件，类型未注册时返回 `UnknownLeafType`
    pub fn evaluate(&self, spec: &LeafSpec, context: &dyn ConditionContext) -> Result<bool> {
        self.lookup(spec)?.evaluate(spec, context)
    }

    pub fn validate(&self, spec: &LeafSpec) -> LeafValidation {
        match self.lookup(spec) {
            Ok(evaluator) => evaluator.validate(spec),
            Err(e) => LeafValidation::with_errors(vec![e.to_string()]),
        }
    }

    pub fn default_payload(&self, kind: &str) -> Option<LeafSpec> {
        self.get(kind).map(|evaluator| evaluator.default_payload())
    }

    fn lookup(&self, spec: &LeafSpec) -> Result<&Arc<dyn LeafEvaluator>> {
        self.evaluators
            .get(spec.kind())
            .ok_or_else(|| EngineError::UnknownLeafType(spec.kind().to_string()))
    }
}

impl fmt::Debug for LeafRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JsonContext;
    use crate::operators::Operator;
    use serde_json::json;

    struct AlwaysTrue;

    impl LeafEvaluator for AlwaysTrue {
        fn kind(&self) -> &'static str {
            LeafSpec::PROVIDER
        }

        fn validate(&self, _spec: &LeafSpec) -> LeafValidation {
            LeafValidation::ok()
        }

        fn evaluate(&self, _spec: &LeafSpec, _context: &dyn ConditionContext) -> Result<bool> {
            Ok(true)
        }

        fn default_payload(&self) -> LeafSpec {
            LeafSpec::Provider {
                provider_ids: vec![],
            }
        }
    }

    #[test]
    fn test_builtin_kinds() {
        let registry = LeafRegistry::builtin();
        assert_eq!(
            registry.kinds(),
            vec![
                "appointment_day_of_week",
                "appointment_time",
                "buyer_field",
                "order_amount",
                "order_source",
                "provider",
            ]
        );
        assert!(!registry.contains("weather"));
    }

    #[test]
    fn test_unknown_leaf_type() {
        let registry = LeafRegistry::new();
        let spec = LeafSpec::OrderSource {
            operator: Operator::Eq,
            value: json!("BUYER"),
        };
        let result = registry.evaluate(&spec, &JsonContext::default());
        assert!(matches!(result, Err(EngineError::UnknownLeafType(kind)) if kind == "order_source"));
        assert!(!registry.validate(&spec).is_valid());
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = LeafRegistry::builtin();
        assert!(registry.register(AlwaysTrue).is_some());

        let spec = LeafSpec::Provider {
            provider_ids: vec!["nobody".to_string()],
        };
        assert!(registry.evaluate(&spec, &JsonContext::default()).unwrap());
        assert_eq!(
            registry.default_payload(LeafSpec::PROVIDER),
            Some(LeafSpec::Provider {
                provider_ids: vec![]
            })
        );
    }
}
