//! 条件树求值
//!
//! 将构建好的 `Group` 归约为布尔值。叶子条件的判定交给调用方提供的函数，
//! 未配置的占位节点视为 true，不阻塞规则匹配。

use crate::models::{ConditionNode, LeafSpec};
use crate::tree::Group;
use std::convert::Infallible;

/// 使用不会失败的叶子判定函数求值
///
/// 空 AND 分组为 true，空 OR 分组为 false。
pub fn evaluate<C, F>(tree: &Group, context: &C, mut leaf_fn: F) -> bool
where
    C: ?Sized,
    F: FnMut(&LeafSpec, &C) -> bool,
{
    let result = TreeEvaluator::new().evaluate(tree, context, |spec, ctx| {
        Ok::<bool, Infallible>(leaf_fn(spec, ctx))
    });
    match result {
        Ok(evaluation) => evaluation.matched,
        Err(never) => match never {},
    }
}

/// 使用可能失败的叶子判定函数求值，首个错误终止整棵树的求值
pub fn try_evaluate<C, F, E>(tree: &Group, context: &C, leaf_fn: F) -> Result<bool, E>
where
    C: ?Sized,
    F: FnMut(&LeafSpec, &C) -> Result<bool, E>,
{
    TreeEvaluator::new()
        .evaluate(tree, context, leaf_fn)
        .map(|evaluation| evaluation.matched)
}

/// 求值结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub matched: bool,
    /// 实际调用叶子判定函数的次数
    pub evaluated_leaves: usize,
    /// 跳过的占位节点数
    pub unset_leaves: usize,
    pub trace: Vec<String>,
}

/// 条件树求值器（短路求值）
#[derive(Debug, Clone, Default)]
pub struct TreeEvaluator {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl TreeEvaluator {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn evaluate<C, F, E>(&self, tree: &Group, context: &C, mut leaf_fn: F) -> Result<Evaluation, E>
    where
        C: ?Sized,
        F: FnMut(&LeafSpec, &C) -> Result<bool, E>,
    {
        let mut evaluation = Evaluation::default();
        let matched = self.evaluate_group(tree, context, &mut leaf_fn, &mut evaluation)?;
        evaluation.matched = matched;
        Ok(evaluation)
    }

    fn evaluate_group<C, F, E>(
        &self,
        group: &Group,
        context: &C,
        leaf_fn: &mut F,
        evaluation: &mut Evaluation,
    ) -> Result<bool, E>
    where
        C: ?Sized,
        F: FnMut(&LeafSpec, &C) -> Result<bool, E>,
    {
        self.record(evaluation, || {
            format!(
                "{}: 开始评估 {} 组 (叶子 {}, 子分组 {})",
                group.id,
                group.logic,
                group.leaves.len(),
                group.children.len()
            )
        });

        // AND 遇到 false、OR 遇到 true 即可确定结果
        let decisive = !group.logic.identity();

        for leaf in &group.leaves {
            if self.evaluate_leaf(leaf, context, leaf_fn, evaluation)? == decisive {
                self.record_short_circuit(evaluation, group, &leaf.path.to_string());
                return Ok(decisive);
            }
        }

        for child in &group.children {
            if self.evaluate_group(child, context, leaf_fn, evaluation)? == decisive {
                self.record_short_circuit(evaluation, group, &child.id);
                return Ok(decisive);
            }
        }

        let result = group.logic.identity();
        self.record(evaluation, || format!("{}: {} 组结果 {}", group.id, group.logic, result));
        Ok(result)
    }

    fn evaluate_leaf<C, F, E>(
        &self,
        leaf: &ConditionNode,
        context: &C,
        leaf_fn: &mut F,
        evaluation: &mut Evaluation,
    ) -> Result<bool, E>
    where
        C: ?Sized,
        F: FnMut(&LeafSpec, &C) -> Result<bool, E>,
    {
        let Some(spec) = &leaf.payload else {
            evaluation.unset_leaves += 1;
            self.record(evaluation, || format!("{}: 未配置条件 => SKIPPED", leaf.path));
            return Ok(true);
        };

        evaluation.evaluated_leaves += 1;
        let matched = leaf_fn(spec, context)?;
        self.record(evaluation, || {
            format!(
                "{}: {} => {}",
                leaf.path,
                spec,
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            )
        });
        Ok(matched)
    }

    fn record_short_circuit(&self, evaluation: &mut Evaluation, group: &Group, member: &str) {
        self.record(evaluation, || {
            format!("{}: {} 短路 - 成员 {}", group.id, group.logic, member)
        });
    }

    fn record(&self, evaluation: &mut Evaluation, line: impl FnOnce() -> String) {
        if self.trace_enabled {
            evaluation.trace.push(line());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{LogicalOperator, Operator};
    use crate::tree::TreeBuilder;
    use serde_json::json;

    fn source_is(value: &str) -> LeafSpec {
        LeafSpec::OrderSource {
            operator: Operator::Eq,
            value: json!(value),
        }
    }

    /// 测试用叶子判定：只认订单来源为 BUYER
    fn buyer_only(spec: &LeafSpec, _ctx: &()) -> bool {
        matches!(spec, LeafSpec::OrderSource { value, .. } if value == "BUYER")
    }

    #[test]
    fn test_empty_groups_use_identity() {
        let empty = TreeBuilder::build(&[]);
        assert!(evaluate(&empty, &(), buyer_only));

        let mut or_group = empty.clone();
        or_group.logic = LogicalOperator::Or;
        assert!(!evaluate(&or_group, &(), buyer_only));
    }

    #[test]
    fn test_single_unset_leaf_is_true() {
        let tree = TreeBuilder::build(&[ConditionNode::placeholder(vec![0], LogicalOperator::Or)]);
        let evaluation = TreeEvaluator::new()
            .evaluate(&tree, &(), |_, _| Err::<bool, ()>(()))
            .unwrap();
        assert!(evaluation.matched);
        assert_eq!(evaluation.unset_leaves, 1);
        assert_eq!(evaluation.evaluated_leaves, 0);
    }

    #[test]
    fn test_and_or_reduction() {
        let nodes = vec![
            ConditionNode::new(vec![0, 0], LogicalOperator::And, source_is("BUYER")),
            ConditionNode::new(vec![0, 1], LogicalOperator::And, source_is("VENDOR")),
            ConditionNode::new(vec![1], LogicalOperator::Or, source_is("BUYER")),
        ];
        let tree = TreeBuilder::build(&nodes);
        // (BUYER AND VENDOR) OR BUYER
        assert!(evaluate(&tree, &(), buyer_only));

        let and_only = TreeBuilder::build(&nodes[..2]);
        assert!(!evaluate(&and_only, &(), buyer_only));
    }

    #[test]
    fn test_short_circuit_and_trace() {
        let nodes = vec![
            ConditionNode::new(vec![0], LogicalOperator::And, source_is("VENDOR")),
            ConditionNode::new(vec![1], LogicalOperator::And, source_is("BUYER")),
        ];
        let tree = TreeBuilder::build(&nodes);
        let evaluation = TreeEvaluator::new()
            .with_trace()
            .evaluate(&tree, &(), |spec, ctx| Ok::<_, ()>(buyer_only(spec, ctx)))
            .unwrap();

        assert!(!evaluation.matched);
        assert_eq!(evaluation.evaluated_leaves, 1);
        assert!(evaluation.trace.iter().any(|line| line.contains("短路")));
    }

    #[test]
    fn test_try_evaluate_propagates_leaf_error() {
        let tree = TreeBuilder::build(&[ConditionNode::new(
            vec![0],
            LogicalOperator::And,
            source_is("BUYER"),
        )]);
        let result = try_evaluate(&tree, &(), |_, _| Err::<bool, &str>("boom"));
        assert_eq!(result, Err("boom"));
    }
}
