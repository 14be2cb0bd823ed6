//! 规则校验
//!
//! 入库前检查扁平节点列表的结构完整性和每个叶子条件的配置。

use crate::error::{EngineError, Result};
use crate::models::{ConditionNode, Rule};
use crate::path::PathKey;
use crate::registry::LeafRegistry;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// 规则校验器
#[derive(Debug, Clone)]
pub struct RuleValidator {
    registry: LeafRegistry,
}

impl RuleValidator {
    pub fn new(registry: LeafRegistry) -> Self {
        Self { registry }
    }

    /// 校验规则，所有问题汇总到一个 `ValidationFailed` 中
    pub fn validate(&self, rule: &Rule) -> Result<()> {
        let mut issues = Vec::new();

        if rule.id.trim().is_empty() {
            issues.push("规则 ID 不能为空".to_string());
        }
        if rule.name.trim().is_empty() {
            issues.push("规则名称不能为空".to_string());
        }
        issues.extend(Self::check_nodes(&rule.nodes));
        issues.extend(self.check_payloads(&rule.nodes));

        if issues.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ValidationFailed {
                rule_id: rule.id.clone(),
                issues,
            })
        }
    }

    /// 检查节点列表的结构问题，不检查条件配置
    pub fn check_nodes(nodes: &[ConditionNode]) -> Vec<String> {
        let mut issues = Vec::new();
        let mut ids = HashSet::new();
        let mut leaf_paths = HashSet::new();

        for node in nodes {
            if node.path.is_empty() {
                issues.push(format!("节点 {} 的路径为空", node.id));
            }
            if !ids.insert(node.id) {
                issues.push(format!("节点 ID 重复: {}", node.id));
            }
            if !leaf_paths.insert(&node.path) {
                issues.push(format!("路径 {} 被多个节点占用", node.path));
            }
        }

        // 叶子与子分组不能共用同一序号
        let group_prefixes: HashSet<PathKey> = nodes
            .iter()
            .filter(|node| node.path.len() > 1)
            .flat_map(|node| (1..node.path.len()).filter_map(|k| node.path.prefix(k).ok()))
            .collect();
        for node in nodes {
            if group_prefixes.contains(&node.path) {
                issues.push(format!("路径 {} 同时是叶子和子分组", node.path));
            }
        }

        // 同级节点逻辑必须一致
        let mut sibling_logic = BTreeMap::new();
        for node in nodes.iter().filter(|node| !node.path.is_empty()) {
            let Ok(parent) = node.path.parent() else {
                continue;
            };
            let expected = *sibling_logic.entry(parent.clone()).or_insert(node.logic);
            if expected != node.logic {
                issues.push(
                    EngineError::InconsistentSiblingLogic {
                        group: parent.to_string(),
                        expected: expected.to_string(),
                        actual: node.logic.to_string(),
                    }
                    .to_string(),
                );
            }
        }

        issues
    }

    fn check_payloads(&self, nodes: &[ConditionNode]) -> Vec<String> {
        let mut issues = Vec::new();

        for node in nodes {
            let Some(spec) = &node.payload else {
                continue;
            };
            if !self.registry.contains(spec.kind()) {
                // 未注册的类型求值时按不匹配处理，不阻止入库
                warn!(node_id = %node.id, kind = spec.kind(), "条件类型未注册");
                continue;
            }
            let validation = self.registry.validate(spec);
            issues.extend(
                validation
                    .errors
                    .into_iter()
                    .map(|error| format!("{}: {}", node.path, error)),
            );
        }

        issues
    }
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new(LeafRegistry::builtin())
    }
}
