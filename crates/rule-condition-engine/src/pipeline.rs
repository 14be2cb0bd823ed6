//! 规则评估管道
//!
//! 过滤在参考时间点生效的规则，逐条构建条件树并求值，按规则顺序汇总命中规则的动作。
//! 单条规则失败只影响该规则本身（按不匹配处理），失败信息进入错误收集器。

use crate::context::ConditionContext;
use crate::error::EngineError;
use crate::evaluator::TreeEvaluator;
use crate::models::{ActionSpec, LeafSpec, Rule};
use crate::registry::LeafRegistry;
use crate::tree::TreeBuilder;
use chrono::{DateTime, Utc};
use rules_shared::observability::metrics as rule_metrics;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 单条规则的评估失败
#[derive(Debug, Serialize)]
pub struct RuleFailure {
    pub rule_id: String,
    pub code: &'static str,
    pub message: String,
    #[serde(skip)]
    pub error: EngineError,
}

impl RuleFailure {
    fn new(rule_id: &str, error: EngineError) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            code: error.code(),
            message: error.to_string(),
            error,
        }
    }
}

/// 管道评估结果
#[derive(Debug, Default, Serialize)]
pub struct PipelineOutcome {
    /// 命中规则的动作，按规则顺序拼接，不去重
    pub actions: Vec<ActionSpec>,
    pub matched_rule_ids: Vec<String>,
    /// 错误收集器：失败的规则以及未注册的条件类型
    pub failures: Vec<RuleFailure>,
    /// 启用追踪时每条规则的评估过程
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<(String, Vec<String>)>,
}

impl PipelineOutcome {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// 规则评估管道
#[derive(Debug, Clone)]
pub struct RulePipeline {
    registry: LeafRegistry,
    evaluator: TreeEvaluator,
}

impl RulePipeline {
    pub fn new(registry: LeafRegistry) -> Self {
        Self {
            registry,
            evaluator: TreeEvaluator::new(),
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.evaluator = self.evaluator.with_trace();
        self
    }

    pub fn registry(&self) -> &LeafRegistry {
        &self.registry
    }

    /// 评估规则列表，返回命中规则的动作
    pub fn evaluate_rules(
        &self,
        rules: &[Rule],
        context: &dyn ConditionContext,
        as_of: DateTime<Utc>,
    ) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();

        for rule in rules.iter().filter(|rule| rule.is_active_at(as_of)) {
            let start = Instant::now();
            let matched = self.evaluate_rule(rule, context, &mut outcome);
            rule_metrics::record_rule_evaluation(matched, start.elapsed().as_secs_f64());

            if matched {
                outcome.actions.extend(rule.actions.iter().cloned());
                outcome.matched_rule_ids.push(rule.id.clone());
            }
        }

        info!(
            total = rules.len(),
            matched = outcome.matched_rule_ids.len(),
            actions = outcome.actions.len(),
            failures = outcome.failures.len(),
            "规则评估完成"
        );

        outcome
    }

    /// 评估单条规则，失败时记录并按不匹配处理
    fn evaluate_rule(
        &self,
        rule: &Rule,
        context: &dyn ConditionContext,
        outcome: &mut PipelineOutcome,
    ) -> bool {
        let tree = TreeBuilder::build(&rule.nodes);
        let mut unknown_kinds = Vec::new();

        let result = self.evaluator.evaluate(&tree, context, |spec, ctx| {
            self.evaluate_leaf(spec, ctx, &mut unknown_kinds)
        });

        for kind in unknown_kinds {
            outcome
                .failures
                .push(RuleFailure::new(&rule.id, EngineError::UnknownLeafType(kind)));
        }

        match result {
            Ok(evaluation) => {
                debug!(
                    rule_id = %rule.id,
                    matched = evaluation.matched,
                    evaluated_leaves = evaluation.evaluated_leaves,
                    unset_leaves = evaluation.unset_leaves,
                    "规则评估"
                );
                if !evaluation.trace.is_empty() {
                    outcome.traces.push((rule.id.clone(), evaluation.trace));
                }
                evaluation.matched
            }
            Err(error) => {
                warn!(
                    rule_id = %rule.id,
                    code = error.code(),
                    error = %error,
                    "规则评估失败，按不匹配处理"
                );
                rule_metrics::record_rule_failure(error.code());
                outcome.failures.push(RuleFailure::new(&rule.id, error));
                false
            }
        }
    }

    /// 未注册的类型只让该叶子不匹配，其他错误终止整条规则
    fn evaluate_leaf(
        &self,
        spec: &LeafSpec,
        context: &dyn ConditionContext,
        unknown_kinds: &mut Vec<String>,
    ) -> Result<bool, EngineError> {
        match self.registry.evaluate(spec, context) {
            Err(EngineError::UnknownLeafType(kind)) => {
                warn!(kind = %kind, "条件类型未注册，按不匹配处理");
                rule_metrics::record_unknown_leaf_type(&kind);
                unknown_kinds.push(kind);
                Ok(false)
            }
            other => other,
        }
    }
}

impl Default for RulePipeline {
    fn default() -> Self {
        Self::new(LeafRegistry::builtin())
    }
}
