//! 条件树构建
//!
//! 从扁平的 `ConditionNode` 列表按公共路径前缀重建嵌套的 `Group` 结构。
//! `Group` 只存在于内存中，每次求值或展示时重新构建，从不持久化。

use crate::models::{ConditionNode, LeafSpec};
use crate::operators::LogicalOperator;
use crate::path::PathKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

/// 由公共前缀重建的分组
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    /// 前缀的字符串形式，根分组为 "root"
    pub id: String,
    pub prefix: PathKey,
    pub logic: LogicalOperator,
    /// 路径恰好在本层结束的节点，按序号排列
    pub leaves: Vec<ConditionNode>,
    /// 子分组，按序号排列
    pub children: Vec<Group>,
}

impl Group {
    fn empty(prefix: PathKey) -> Self {
        Self {
            id: prefix.to_string(),
            prefix,
            logic: LogicalOperator::default(),
            leaves: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.children.is_empty()
    }

    /// 直接成员数量（叶子 + 子分组）
    pub fn member_count(&self) -> usize {
        self.leaves.len() + self.children.len()
    }

    /// 子树中的叶子节点总数
    pub fn leaf_count(&self) -> usize {
        self.leaves.len() + self.children.iter().map(Group::leaf_count).sum::<usize>()
    }

    /// 嵌套深度，只有叶子的分组深度为 1
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Group::depth).max().unwrap_or(0)
    }

    /// 直接成员在本层占用的序号
    pub fn member_indices(&self) -> Vec<usize> {
        let depth = self.prefix.len();
        self.leaves
            .iter()
            .chain(self.children.iter().flat_map(|child| child.first_node()))
            .filter_map(|node| node.path.component(depth))
            .collect()
    }

    /// 下一个可用的序号：本层已占用序号的最大值 + 1
    pub fn next_index(&self) -> usize {
        self.member_indices()
            .into_iter()
            .max()
            .map_or(0, |max| max + 1)
    }

    /// 查找指定前缀的分组
    pub fn find(&self, prefix: &PathKey) -> Option<&Group> {
        if &self.prefix == prefix {
            return Some(self);
        }
        if !self.prefix.is_prefix_of(prefix) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(prefix))
    }

    /// 按路径查找节点（深度优先）
    pub fn find_node(&self, path: &PathKey) -> Option<&ConditionNode> {
        self.leaves
            .iter()
            .find(|leaf| &leaf.path == path)
            .or_else(|| self.children.iter().find_map(|child| child.find_node(path)))
    }

    /// 展开为扁平节点列表（前序）
    pub fn flatten(&self) -> Vec<ConditionNode> {
        let mut nodes = Vec::with_capacity(self.leaf_count());
        self.collect_nodes(&mut nodes);
        nodes
    }

    fn collect_nodes(&self, nodes: &mut Vec<ConditionNode>) {
        nodes.extend(self.leaves.iter().cloned());
        for child in &self.children {
            child.collect_nodes(nodes);
        }
    }

    fn first_node(&self) -> Option<&ConditionNode> {
        self.leaves
            .first()
            .or_else(|| self.children.iter().find_map(Group::first_node))
    }
}

/// 条件树构建器
pub struct TreeBuilder;

impl TreeBuilder {
    /// 从扁平节点列表构建根分组
    ///
    /// 结果与输入顺序无关；对同一列表重复构建得到结构相同的树。
    pub fn build(nodes: &[ConditionNode]) -> Group {
        let members: Vec<&ConditionNode> = nodes
            .iter()
            .filter(|node| {
                if node.path.is_empty() {
                    warn!(node_id = %node.id, "忽略路径为空的条件节点");
                    return false;
                }
                true
            })
            .collect();

        Self::build_group(PathKey::root(), members)
    }

    fn build_group(prefix: PathKey, members: Vec<&ConditionNode>) -> Group {
        let depth = prefix.len();
        let mut group = Group::empty(prefix);
        let mut buckets: BTreeMap<usize, Vec<&ConditionNode>> = BTreeMap::new();

        for node in members {
            let components = node.path.components();
            if components.len() == depth + 1 {
                group.leaves.push(node.clone());
            } else if let Some(&slot) = components.get(depth) {
                buckets.entry(slot).or_default().push(node);
            }
        }

        group.leaves.sort_by(Self::slot_order);
        group.children = buckets
            .into_iter()
            .map(|(slot, nodes)| Self::build_group(group.prefix.append(slot), nodes))
            .collect();
        group.logic = Self::resolve_logic(&group);

        group
    }

    /// 同层节点按序号排序，序号相同时按节点 ID 保证确定性
    fn slot_order(a: &ConditionNode, b: &ConditionNode) -> Ordering {
        a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id))
    }

    /// 取序号最小的叶子的逻辑；发现不一致时记录告警并以该值为准
    ///
    /// 没有直接叶子的分组无处保存逻辑，取首个子分组逻辑的相反值：
    /// `GroupEditor` 保证子分组逻辑与父分组不同。
    fn resolve_logic(group: &Group) -> LogicalOperator {
        let Some(first) = group.leaves.first() else {
            return group
                .children
                .first()
                .map(|child| child.logic.flip())
                .unwrap_or_default();
        };

        if let Some(other) = group.leaves.iter().find(|leaf| leaf.logic != first.logic) {
            warn!(
                group = %group.id,
                expected = %first.logic,
                actual = %other.logic,
                node_id = %other.id,
                "InconsistentSiblingLogic: 同级节点逻辑不一致，按首个节点归一"
            );
        }

        first.logic
    }
}

/// 嵌套形式的条件树，用于编写规则和在两种表示之间转换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionTree {
    Leaf {
        #[serde(default)]
        spec: Option<LeafSpec>,
    },
    Group {
        logic: LogicalOperator,
        members: Vec<ConditionTree>,
    },
}

impl ConditionTree {
    pub fn leaf(spec: LeafSpec) -> Self {
        Self::Leaf { spec: Some(spec) }
    }

    pub fn unset() -> Self {
        Self::Leaf { spec: None }
    }

    pub fn and(members: Vec<ConditionTree>) -> Self {
        Self::Group {
            logic: LogicalOperator::And,
            members,
        }
    }

    pub fn or(members: Vec<ConditionTree>) -> Self {
        Self::Group {
            logic: LogicalOperator::Or,
            members,
        }
    }

    /// 编码为扁平节点列表
    ///
    /// 根必须是分组；单独的叶子视为只有一个成员的 AND 分组。
    /// 分组的逻辑只能通过其直接叶子保存，没有直接叶子的分组解码后
    /// 取首个子分组逻辑的相反值，因此只含子分组的分组应与子分组逻辑交替。
    pub fn encode(&self) -> Vec<ConditionNode> {
        let mut nodes = Vec::new();
        match self {
            Self::Group { logic, members } => {
                Self::encode_members(&PathKey::root(), *logic, members, &mut nodes)
            }
            leaf @ Self::Leaf { .. } => Self::encode_members(
                &PathKey::root(),
                LogicalOperator::And,
                std::slice::from_ref(leaf),
                &mut nodes,
            ),
        }
        nodes
    }

    fn encode_members(
        prefix: &PathKey,
        logic: LogicalOperator,
        members: &[ConditionTree],
        nodes: &mut Vec<ConditionNode>,
    ) {
        for (slot, member) in members.iter().enumerate() {
            let path = prefix.append(slot);
            match member {
                Self::Leaf { spec } => nodes.push(ConditionNode {
                    payload: spec.clone(),
                    ..ConditionNode::placeholder(path, logic)
                }),
                Self::Group {
                    logic: inner,
                    members,
                } => Self::encode_members(&path, *inner, members, nodes),
            }
        }
    }

    /// 从构建好的分组解码，成员按序号合并叶子与子分组
    pub fn decode(group: &Group) -> Self {
        let depth = group.prefix.len();
        let mut slots: Vec<(usize, ConditionTree)> = group
            .leaves
            .iter()
            .map(|leaf| {
                let slot = leaf.path.component(depth).unwrap_or_default();
                (slot, Self::Leaf {
                    spec: leaf.payload.clone(),
                })
            })
            .chain(group.children.iter().map(|child| {
                let slot = child.prefix.component(depth).unwrap_or_default();
                (slot, Self::decode(child))
            }))
            .collect();
        slots.sort_by_key(|(slot, _)| *slot);

        Self::Group {
            logic: group.logic,
            members: slots.into_iter().map(|(_, member)| member).collect(),
        }
    }
}
