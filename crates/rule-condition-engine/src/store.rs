//! 规则存储管理
//!
//! 使用 DashMap 按商户（member）保存规则，规则只会被归档，从不物理删除。
//! 这是引擎的持久化边界：写入和读出的都是扁平节点列表。

use crate::context::ConditionContext;
use crate::error::{EngineError, Result};
use crate::models::{ConditionNode, Rule};
use crate::pipeline::{PipelineOutcome, RulePipeline};
use crate::validator::RuleValidator;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 解析规则 JSON，接受单条规则或规则数组
pub fn parse_rules(json: &str) -> Result<Vec<Rule>> {
    let value: Value = serde_json::from_str(json)?;
    let rules = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        Value::Object(_) => vec![serde_json::from_value(value)?],
        other => {
            return Err(EngineError::ParseError(format!(
                "规则文件必须是对象或数组，实际为 {}",
                crate::comparator::ValueComparator::type_name(&other)
            )));
        }
    };
    Ok(rules)
}

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    /// member_id -> 按创建时间排序的规则
    rules: Arc<DashMap<String, Vec<Rule>>>,
    /// rule_id -> member_id
    index: Arc<DashMap<String, String>>,
    validator: Arc<RuleValidator>,
    pipeline: Arc<RulePipeline>,
}

impl RuleStore {
    pub fn new(validator: RuleValidator, pipeline: RulePipeline) -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            index: Arc::new(DashMap::new()),
            validator: Arc::new(validator),
            pipeline: Arc::new(pipeline),
        }
    }

    /// 当前存储的规则数量（含已归档）
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// 校验并保存规则
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, member_id = %rule.member_id))]
    pub fn insert(&self, rule: Rule) -> Result<()> {
        self.validator.validate(&rule)?;

        // 占位与判重在同一个分片锁内完成
        match self.index.entry(rule.id.clone()) {
            Entry::Occupied(_) => return Err(Self::duplicate_id(&rule.id)),
            Entry::Vacant(slot) => {
                slot.insert(rule.member_id.clone());
            }
        }

        let rule_id = rule.id.clone();
        let mut member_rules = self.rules.entry(rule.member_id.clone()).or_default();
        let position = member_rules.partition_point(|existing| existing.created_at <= rule.created_at);
        member_rules.insert(position, rule);

        info!("规则已保存: {}", rule_id);
        Ok(())
    }

    /// 获取规则
    pub fn get(&self, rule_id: &str) -> Option<Rule> {
        let member_id = self.index.get(rule_id)?.value().clone();
        self.rules
            .get(&member_id)?
            .iter()
            .find(|rule| rule.id == rule_id)
            .cloned()
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.index.contains_key(rule_id)
    }

    /// 商户的全部规则（含已归档），按创建顺序
    pub fn rules_for(&self, member_id: &str) -> Vec<Rule> {
        self.rules
            .get(member_id)
            .map(|rules| rules.clone())
            .unwrap_or_default()
    }

    /// 写回编辑后的节点列表
    #[instrument(skip(self, nodes), fields(node_count = nodes.len()))]
    pub fn replace_nodes(&self, rule_id: &str, nodes: Vec<ConditionNode>) -> Result<()> {
        self.modify(rule_id, |rule| {
            let mut updated = rule.clone();
            updated.nodes = nodes;
            self.validator.validate(&updated)?;
            *rule = updated;
            Ok(())
        })?;

        info!("规则条件已更新: {}", rule_id);
        Ok(())
    }

    /// 归档规则，已归档的规则保持原归档时间
    #[instrument(skip(self))]
    pub fn archive(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.modify(rule_id, |rule| {
            match rule.archived_at {
                Some(existing) => warn!("规则已在 {} 归档: {}", existing, rule_id),
                None => rule.archived_at = Some(at),
            }
            Ok(())
        })?;

        info!("规则已归档: {}", rule_id);
        Ok(())
    }

    fn duplicate_id(rule_id: &str) -> EngineError {
        EngineError::ValidationFailed {
            rule_id: rule_id.to_string(),
            issues: vec!["规则 ID 已存在".to_string()],
        }
    }

    /// 以新规则替换旧规则：新规则入库后旧规则在 `at` 归档
    ///
    /// 新规则无法入库时旧规则保持生效。
    #[instrument(skip(self, replacement), fields(replacement_id = %replacement.id))]
    pub fn supersede(&self, rule_id: &str, mut replacement: Rule, at: DateTime<Utc>) -> Result<()> {
        let previous = self
            .get(rule_id)
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))?;

        if replacement.member_id.is_empty() {
            replacement.member_id = previous.member_id;
        }
        let replacement_id = replacement.id.clone();
        self.insert(replacement)?;

        if let Err(error) = self.archive(rule_id, at) {
            warn!("旧规则归档失败，撤回新规则 {}: {}", replacement_id, error);
            self.discard(&replacement_id);
            return Err(error);
        }
        Ok(())
    }

    /// 撤回刚写入的规则
    fn discard(&self, rule_id: &str) {
        if let Some((_, member_id)) = self.index.remove(rule_id) {
            if let Some(mut member_rules) = self.rules.get_mut(&member_id) {
                member_rules.retain(|rule| rule.id != rule_id);
            }
        }
    }

    /// 从 JSON 加载规则，单条失败只记录告警
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<Vec<String>> {
        let rules = parse_rules(json)?;
        Ok(self.load_batch(rules))
    }

    /// 批量保存规则，返回成功保存的规则 ID
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub fn load_batch(&self, rules: Vec<Rule>) -> Vec<String> {
        let mut loaded_ids = Vec::with_capacity(rules.len());
        let mut errors = Vec::new();

        for rule in rules {
            let rule_id = rule.id.clone();
            match self.insert(rule) {
                Ok(()) => loaded_ids.push(rule_id),
                Err(e) => errors.push((rule_id, e)),
            }
        }

        if !errors.is_empty() {
            warn!("批量加载部分失败: {:?}", errors);
        }

        info!("批量加载完成: {} 成功, {} 失败", loaded_ids.len(), errors.len());
        loaded_ids
    }

    /// 评估商户在 `as_of` 时生效的规则
    #[instrument(skip(self, context))]
    pub fn evaluate(
        &self,
        member_id: &str,
        context: &dyn ConditionContext,
        as_of: DateTime<Utc>,
    ) -> PipelineOutcome {
        let rules = self.rules_for(member_id);
        self.pipeline.evaluate_rules(&rules, context, as_of)
    }

    /// 获取存储统计信息
    pub fn stats(&self, as_of: DateTime<Utc>) -> RuleStoreStats {
        let mut stats = RuleStoreStats {
            members: self.rules.len(),
            ..Default::default()
        };

        for entry in self.rules.iter() {
            for rule in entry.value() {
                stats.rules_count += 1;
                stats.total_nodes += rule.nodes.len();
                if rule.is_archived() {
                    stats.archived_rules += 1;
                }
                if rule.is_active_at(as_of) {
                    stats.active_rules += 1;
                }
            }
        }

        stats
    }

    fn modify<F>(&self, rule_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Rule) -> Result<()>,
    {
        let member_id = self
            .index
            .get(rule_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))?;

        let mut member_rules = self
            .rules
            .get_mut(&member_id)
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))?;
        let rule = member_rules
            .iter_mut()
            .find(|rule| rule.id == rule_id)
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))?;

        f(rule)
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(RuleValidator::default(), RulePipeline::default())
    }
}

/// 规则存储统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleStoreStats {
    pub members: usize,
    /// 规则总数（含已归档）
    pub rules_count: usize,
    pub active_rules: usize,
    pub archived_rules: usize,
    pub total_nodes: usize,
}
