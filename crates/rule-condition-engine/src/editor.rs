//! 分组结构编辑
//!
//! 所有操作接收完整的扁平节点列表并返回新的列表，不修改输入，也不修改 `Group`。
//! 运算符变化通过新增嵌套层表达（包裹）。每次编辑后整理整棵树：
//! 子分组的逻辑总与父分组不同，冗余嵌套层被解除。锁定和必需分组不参与整理。

use crate::error::{EngineError, Result};
use crate::models::{ConditionNode, LeafSpec, NodeId};
use crate::operators::LogicalOperator;
use crate::path::PathKey;
use rules_shared::config::EngineConfig;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// 不允许删除的根层序号（系统预置条件）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockedSlots(BTreeSet<usize>);

impl LockedSlots {
    pub fn new(slots: impl IntoIterator<Item = usize>) -> Self {
        Self(slots.into_iter().collect())
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.0.contains(&slot)
    }

    /// 路径是否位于锁定的根层序号之下（包括该序号本身）
    pub fn covers(&self, path: &PathKey) -> bool {
        path.component(0).is_some_and(|slot| self.contains(slot))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 调用方可配置的编辑策略
#[derive(Debug, Clone, Default)]
pub struct EditPolicy {
    /// 拒绝删除最后一个条件
    pub keep_last_root_condition: bool,
    /// 删除后只剩一个叶子的子分组也解除嵌套
    pub unwrap_single_leaf_groups: bool,
    pub locked: LockedSlots,
    /// 清空后需要以占位节点补齐的分组
    pub required_groups: Vec<PathKey>,
}

impl EditPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            keep_last_root_condition: config.keep_last_root_condition,
            unwrap_single_leaf_groups: config.unwrap_single_leaf_groups,
            locked: LockedSlots::new(config.locked_root_slots.iter().copied()),
            required_groups: Vec::new(),
        }
    }

    pub fn with_required_group(mut self, prefix: impl Into<PathKey>) -> Self {
        self.required_groups.push(prefix.into());
        self
    }

    fn is_required(&self, prefix: &PathKey) -> bool {
        self.required_groups.contains(prefix)
    }

    /// 锁定的根层分组和必需分组保持原位，不被合并或解除
    fn is_pinned(&self, prefix: &PathKey) -> bool {
        self.is_required(prefix)
            || (prefix.len() == 1 && self.locked.covers(prefix))
    }
}

/// 编辑期间的分组：逻辑显式保存，叶子以下标引用节点列表
#[derive(Debug)]
struct Draft {
    logic: LogicalOperator,
    /// (序号, 成员)，按序号排列
    members: Vec<(usize, Member)>,
}

#[derive(Debug)]
enum Member {
    Leaf(usize),
    Group(Draft),
}

/// 整理子分组的方式
enum Fix {
    /// 删除空分组
    Drop,
    /// 必需分组补占位节点
    Fill,
    /// 逻辑与父分组相同，成员并入父分组
    Fold,
    /// 单成员分组由其成员取代
    Collapse,
}

impl Draft {
    fn build(nodes: &[ConditionNode]) -> Self {
        let indices = nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.path.is_empty())
            .map(|(index, _)| index)
            .collect();
        Self::build_level(nodes, indices, 0)
    }

    /// 与 `TreeBuilder` 相同的分组规则：逻辑取序号最小的叶子，没有叶子时取首个子分组的相反值
    fn build_level(nodes: &[ConditionNode], indices: Vec<usize>, depth: usize) -> Self {
        let mut leaves = Vec::new();
        let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for index in indices {
            let components = nodes[index].path.components();
            if components.len() == depth + 1 {
                leaves.push(index);
            } else if let Some(&slot) = components.get(depth) {
                buckets.entry(slot).or_default().push(index);
            }
        }

        leaves.sort_by(|&a, &b| {
            nodes[a]
                .path
                .cmp(&nodes[b].path)
                .then_with(|| nodes[a].id.cmp(&nodes[b].id))
        });
        let children: Vec<(usize, Draft)> = buckets
            .into_iter()
            .map(|(slot, indices)| (slot, Self::build_level(nodes, indices, depth + 1)))
            .collect();

        let logic = match leaves.first() {
            Some(&first) => nodes[first].logic,
            None => children
                .first()
                .map(|(_, child)| child.logic.flip())
                .unwrap_or_default(),
        };

        let mut members: Vec<(usize, Member)> = leaves
            .into_iter()
            .map(|index| {
                let slot = nodes[index].path.component(depth).unwrap_or_default();
                (slot, Member::Leaf(index))
            })
            .chain(
                children
                    .into_iter()
                    .map(|(slot, child)| (slot, Member::Group(child))),
            )
            .collect();
        members.sort_by_key(|(slot, _)| *slot);

        Self { logic, members }
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn leaf_count(&self) -> usize {
        self.members
            .iter()
            .map(|(_, member)| match member {
                Member::Leaf(_) => 1,
                Member::Group(child) => child.leaf_count(),
            })
            .sum()
    }

    fn next_slot(&self) -> usize {
        self.members
            .iter()
            .map(|(slot, _)| *slot)
            .max()
            .map_or(0, |max| max + 1)
    }

    fn find_mut(&mut self, prefix: &[usize]) -> Option<&mut Draft> {
        let Some((&first, rest)) = prefix.split_first() else {
            return Some(self);
        };
        self.members.iter_mut().find_map(|(slot, member)| match member {
            Member::Group(child) if *slot == first => child.find_mut(rest),
            _ => None,
        })
    }

    fn append(&mut self, leaf: usize) {
        let slot = self.next_slot();
        self.members.push((slot, Member::Leaf(leaf)));
    }

    /// 全部成员下沉到序号 0 的新子分组，新叶子放在序号 1
    fn wrap(&mut self, leaf: usize, op: LogicalOperator) {
        let inner = Draft {
            logic: self.logic,
            members: std::mem::take(&mut self.members),
        };
        self.logic = op;
        self.members = vec![(0, Member::Group(inner)), (1, Member::Leaf(leaf))];
    }

    /// 放置以 `op` 连接的新叶子
    ///
    /// 返回 false 表示非根分组的逻辑与 `op` 不同，新叶子应由父分组追加。
    fn insert(&mut self, leaf: usize, op: LogicalOperator, is_root: bool) -> bool {
        if self.is_empty() {
            self.logic = op;
            self.members.push((0, Member::Leaf(leaf)));
            return true;
        }
        if self.logic == op {
            self.append(leaf);
            return true;
        }

        // 恰好一个子分组已使用该运算符时，加入该子分组而不是再包一层
        let matching: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, (_, member))| matches!(member, Member::Group(child) if child.logic == op))
            .map(|(position, _)| position)
            .collect();
        if let [position] = *matching.as_slice() {
            if let (_, Member::Group(child)) = &mut self.members[position] {
                return child.insert(leaf, op, false);
            }
        }

        if !is_root {
            return false;
        }
        self.wrap(leaf, op);
        true
    }

    /// 删除序号为 `slot` 的成员，返回删除数量
    fn remove_slot(&mut self, slot: usize) -> usize {
        let before = self.members.len();
        self.members.retain(|(existing, _)| *existing != slot);
        before - self.members.len()
    }

    /// 子分组并入本分组：首个成员占用子分组的序号，其余成员追加在末尾
    fn absorb(&mut self, slot: usize, child: Draft) {
        let mut next = self.next_slot().max(slot + 1);
        for (position, (_, member)) in child.members.into_iter().enumerate() {
            let target = if position == 0 {
                slot
            } else {
                let target = next;
                next += 1;
                target
            };
            self.members.push((target, member));
        }
        self.members.sort_by_key(|(slot, _)| *slot);
    }

    /// 按当前结构写回节点的路径和逻辑
    fn place(&self, prefix: &PathKey, placed: &mut [Option<(PathKey, LogicalOperator)>]) {
        for (slot, member) in &self.members {
            let path = prefix.append(*slot);
            match member {
                Member::Leaf(index) => {
                    if let Some(entry) = placed.get_mut(*index) {
                        *entry = Some((path, self.logic));
                    }
                }
                Member::Group(child) => child.place(&path, placed),
            }
        }
    }
}

/// 分组编辑器
#[derive(Debug, Clone, Default)]
pub struct GroupEditor {
    policy: EditPolicy,
}

impl GroupEditor {
    pub fn new(policy: EditPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &EditPolicy {
        &self.policy
    }

    /// 在分组 `prefix` 中添加一个以 `op` 连接的占位节点
    ///
    /// 返回列表的最后一个元素即新节点。
    pub fn add_sibling(
        &self,
        nodes: &[ConditionNode],
        prefix: &PathKey,
        op: LogicalOperator,
    ) -> Result<Vec<ConditionNode>> {
        let mut arena = nodes.to_vec();
        let mut root = Draft::build(&arena);
        arena.push(ConditionNode::placeholder(prefix.append(0), op));
        let leaf = arena.len() - 1;

        let group = root
            .find_mut(prefix.components())
            .ok_or_else(|| EngineError::GroupNotFound(prefix.to_string()))?;
        if !group.insert(leaf, op, prefix.is_empty()) {
            // 子分组的逻辑与父分组不同，新条件与该分组并列即可
            match root.find_mut(prefix.parent()?.components()) {
                Some(parent) if parent.logic == op => parent.append(leaf),
                _ => {
                    if let Some(group) = root.find_mut(prefix.components()) {
                        group.wrap(leaf, op);
                    }
                }
            }
        }

        debug!(group = %prefix, logic = %op, "添加同级条件");
        Ok(self.settle(root, arena))
    }

    /// 将分组的全部成员下沉到序号 0 的新子分组，并在序号 1 追加以 `op` 连接的占位节点
    ///
    /// 分组逻辑已是 `op` 时直接追加。
    pub fn wrap(
        &self,
        nodes: &[ConditionNode],
        prefix: &PathKey,
        op: LogicalOperator,
    ) -> Result<Vec<ConditionNode>> {
        let mut arena = nodes.to_vec();
        let mut root = Draft::build(&arena);
        arena.push(ConditionNode::placeholder(prefix.append(1), op));
        let leaf = arena.len() - 1;

        let group = root
            .find_mut(prefix.components())
            .filter(|group| !group.is_empty())
            .ok_or_else(|| EngineError::GroupNotFound(prefix.to_string()))?;
        if group.logic == op {
            group.append(leaf);
        } else {
            debug!(group = %prefix, logic = %op, "运算符变化，包裹现有成员");
            group.wrap(leaf, op);
        }

        Ok(self.settle(root, arena))
    }

    /// 解除分组 `prefix` 的嵌套
    ///
    /// 分组是父分组的唯一成员时，成员整体上移一层；
    /// 分组只有一个成员时，该成员取代分组占据原序号。
    pub fn unwrap(&self, nodes: &[ConditionNode], prefix: &PathKey) -> Result<Vec<ConditionNode>> {
        if prefix.is_empty() {
            return Err(EngineError::InvalidPath("根分组无法解除嵌套".to_string()));
        }

        let arena = nodes.to_vec();
        let mut root = Draft::build(&arena);
        let slot = prefix.last_component()?;
        let parent = root
            .find_mut(prefix.parent()?.components())
            .ok_or_else(|| EngineError::GroupNotFound(prefix.to_string()))?;
        let (position, member_count) = parent
            .members
            .iter()
            .enumerate()
            .find_map(|(position, (existing, member))| match member {
                Member::Group(group) if *existing == slot => Some((position, group.members.len())),
                _ => None,
            })
            .ok_or_else(|| EngineError::GroupNotFound(prefix.to_string()))?;

        if parent.members.len() == 1 {
            let (_, member) = parent.members.remove(position);
            if let Member::Group(group) = member {
                *parent = group;
            }
        } else if member_count == 1 {
            let lifted = match &mut parent.members[position].1 {
                Member::Group(group) => group.members.pop().map(|(_, member)| member),
                Member::Leaf(_) => None,
            };
            if let Some(member) = lifted {
                parent.members[position].1 = member;
            }
        } else {
            return Err(EngineError::InvalidPath(format!(
                "分组 {} 有 {} 个成员且不是父分组的唯一成员",
                prefix, member_count
            )));
        }

        Ok(self.settle(root, arena))
    }

    /// 是否允许删除 `path`（锁定序号及其后代不可删除）
    pub fn can_remove(&self, path: &PathKey) -> bool {
        !self.policy.locked.covers(path)
    }

    /// 删除路径 `path` 上的节点或分组（含全部后代）
    ///
    /// 删除后整理整棵树：空分组被移除，没有直接叶子且只剩一个子分组的分组被解除嵌套，
    /// 被清空的必需分组补一个占位节点。
    pub fn remove(&self, nodes: &[ConditionNode], path: &PathKey) -> Result<Vec<ConditionNode>> {
        if path.is_empty() {
            return Err(EngineError::InvalidPath("不能删除根分组".to_string()));
        }
        if !self.can_remove(path) {
            return Err(EngineError::LockedGroup(path.to_string()));
        }

        let arena = nodes.to_vec();
        let mut root = Draft::build(&arena);
        let slot = path.last_component()?;
        let removed = root
            .find_mut(path.parent()?.components())
            .map_or(0, |parent| parent.remove_slot(slot));

        if removed == 0 {
            return Err(EngineError::InvalidPath(format!(
                "路径 {} 没有对应的条件节点",
                path
            )));
        }
        if root.leaf_count() == 0 && self.policy.keep_last_root_condition {
            return Err(EngineError::LastRootCondition);
        }

        debug!(path = %path, "删除条件节点");
        Ok(self.settle(root, arena))
    }

    /// 切换分组的连接运算符
    ///
    /// 逻辑与新运算符相同的子分组并入该分组；该分组与父分组逻辑相同时并入父分组。
    pub fn set_logic(
        &self,
        nodes: &[ConditionNode],
        prefix: &PathKey,
        op: LogicalOperator,
    ) -> Result<Vec<ConditionNode>> {
        let arena = nodes.to_vec();
        let mut root = Draft::build(&arena);

        if !prefix.is_empty() && self.policy.is_pinned(prefix) {
            let parent_logic = root
                .find_mut(prefix.parent()?.components())
                .map(|parent| parent.logic);
            if parent_logic == Some(op) {
                return Err(EngineError::InvalidPath(format!(
                    "分组 {} 已锁定，不能改为与父分组相同的逻辑",
                    prefix
                )));
            }
        }

        let group = root
            .find_mut(prefix.components())
            .filter(|group| !group.is_empty())
            .ok_or_else(|| EngineError::GroupNotFound(prefix.to_string()))?;
        if group.logic == op {
            return Ok(arena);
        }
        group.logic = op;

        debug!(group = %prefix, logic = %op, "切换分组逻辑");
        Ok(self.settle(root, arena))
    }

    /// 设置或清空节点的条件配置
    pub fn set_payload(
        &self,
        nodes: &[ConditionNode],
        id: NodeId,
        payload: Option<LeafSpec>,
    ) -> Result<Vec<ConditionNode>> {
        if !nodes.iter().any(|node| node.id == id) {
            return Err(EngineError::NodeNotFound(id.to_string()));
        }

        Ok(nodes
            .iter()
            .map(|node| {
                if node.id == id {
                    ConditionNode {
                        payload: payload.clone(),
                        ..node.clone()
                    }
                } else {
                    node.clone()
                }
            })
            .collect())
    }

    /// 整理编辑后的结构并写回节点列表
    ///
    /// 输入中路径为空的节点不属于任何分组，原样保留；已删除的节点不再输出。
    fn settle(&self, mut root: Draft, mut arena: Vec<ConditionNode>) -> Vec<ConditionNode> {
        let root_prefix = PathKey::root();
        self.normalize(&mut root, &root_prefix, &mut arena);

        // 根分组只剩一个子分组时，子分组成为根
        while root.members.len() == 1 {
            let (slot, member) = root.members.remove(0);
            match member {
                Member::Group(child) if !self.policy.is_pinned(&root_prefix.append(slot)) => {
                    debug!(slot, "自动解除冗余嵌套");
                    root = child;
                }
                member => {
                    root.members.push((slot, member));
                    break;
                }
            }
        }

        if root.is_empty() && self.policy.is_required(&root_prefix) {
            arena.push(ConditionNode::placeholder(root_prefix.append(0), root.logic));
            root.members.push((0, Member::Leaf(arena.len() - 1)));
        }

        let mut placed = vec![None; arena.len()];
        root.place(&root_prefix, &mut placed);

        arena
            .into_iter()
            .zip(placed)
            .filter_map(|(node, placement)| match placement {
                Some((path, logic)) => Some(ConditionNode { path, logic, ..node }),
                None if node.path.is_empty() => Some(node),
                None => None,
            })
            .collect()
    }

    /// 自下而上整理分组的子分组
    fn normalize(&self, group: &mut Draft, prefix: &PathKey, arena: &mut Vec<ConditionNode>) {
        for (slot, member) in &mut group.members {
            if let Member::Group(child) = member {
                self.normalize(child, &prefix.append(*slot), arena);
            }
        }

        loop {
            let next = group
                .members
                .iter()
                .enumerate()
                .find_map(|(position, (slot, member))| match member {
                    Member::Group(child) => self
                        .fix_for(group.logic, child, &prefix.append(*slot))
                        .map(|fix| (position, fix)),
                    Member::Leaf(_) => None,
                });
            let Some((position, fix)) = next else {
                break;
            };

            let (slot, member) = group.members.remove(position);
            let Member::Group(mut child) = member else {
                group.members.insert(position, (slot, member));
                break;
            };
            match fix {
                Fix::Drop => debug!(group = %prefix, slot, "移除空分组"),
                Fix::Fill => {
                    debug!(group = %prefix, slot, "必需分组已清空，补充占位节点");
                    let logic = group.logic.flip();
                    arena.push(ConditionNode::placeholder(prefix.append(slot).append(0), logic));
                    child.logic = logic;
                    child.members.push((0, Member::Leaf(arena.len() - 1)));
                    group.members.insert(position, (slot, Member::Group(child)));
                }
                Fix::Fold => {
                    debug!(group = %prefix, slot, "子分组逻辑与父分组相同，合并");
                    group.absorb(slot, child);
                }
                Fix::Collapse => {
                    debug!(group = %prefix, slot, "单成员分组解除嵌套");
                    if let Some((_, inner)) = child.members.pop() {
                        group.members.insert(position, (slot, inner));
                    }
                }
            }
        }
    }

    fn fix_for(&self, parent_logic: LogicalOperator, child: &Draft, prefix: &PathKey) -> Option<Fix> {
        if child.is_empty() {
            return Some(if self.policy.is_required(prefix) {
                Fix::Fill
            } else {
                Fix::Drop
            });
        }
        if self.policy.is_pinned(prefix) {
            return None;
        }
        if child.logic == parent_logic {
            return Some(Fix::Fold);
        }
        match child.members.as_slice() {
            [(_, Member::Group(_))] => Some(Fix::Collapse),
            [(_, Member::Leaf(_))] if self.policy.unwrap_single_leaf_groups => Some(Fix::Collapse),
            _ => None,
        }
    }
}
