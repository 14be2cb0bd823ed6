//! 条件树属性测试
//!
//! 随机生成条件树和编辑序列，验证构建、编码和结构编辑的不变量。

use proptest::prelude::*;
use proptest::sample::Index;
use rule_engine::{
    ConditionNode, ConditionTree, EditPolicy, Group, GroupEditor, LeafSpec, LogicalOperator,
    Operator, PathKey, RuleValidator, TreeBuilder, evaluate,
};
use serde_json::json;

fn amount_gte(n: u8) -> LeafSpec {
    LeafSpec::OrderAmount {
        operator: Operator::Gte,
        value: json!(n),
    }
}

fn leaf_strategy() -> impl Strategy<Value = ConditionTree> {
    prop_oneof![
        1 => Just(ConditionTree::unset()),
        4 => (0u8..16).prop_map(|n| ConditionTree::leaf(amount_gte(n))),
    ]
}

/// 子分组与父分组运算符交替的条件树，作为编辑序列的起点
fn tree_strategy() -> impl Strategy<Value = ConditionTree> {
    let shape = leaf_strategy().prop_recursive(3, 24, 4, |inner| {
        prop::collection::vec(inner, 1..4).prop_map(ConditionTree::and)
    });

    (shape, any::<bool>()).prop_map(|(tree, or)| {
        let root = match tree {
            leaf @ ConditionTree::Leaf { .. } => ConditionTree::and(vec![leaf]),
            group => group,
        };
        alternate(root, if or { LogicalOperator::Or } else { LogicalOperator::And })
    })
}

fn alternate(tree: ConditionTree, logic: LogicalOperator) -> ConditionTree {
    match tree {
        ConditionTree::Group { members, .. } => ConditionTree::Group {
            logic,
            members: members
                .into_iter()
                .map(|member| alternate(member, logic.flip()))
                .collect(),
        },
        leaf => leaf,
    }
}

/// 叶子真值由掩码决定：amount_gte(n) 为真当且仅当 mask 的第 n 位为 1
fn leaf_truth(spec: &LeafSpec, mask: u16) -> bool {
    match spec {
        LeafSpec::OrderAmount { value, .. } => value
            .as_u64()
            .is_some_and(|n| n < 16 && (mask >> n) & 1 == 1),
        _ => false,
    }
}

fn eval_nodes(nodes: &[ConditionNode], mask: u16) -> bool {
    let tree = TreeBuilder::build(nodes);
    evaluate(&tree, &(), |spec, _| leaf_truth(spec, mask))
}

/// 直接在嵌套结构上求值的参照实现
fn eval_reference(tree: &ConditionTree, mask: u16) -> bool {
    match tree {
        ConditionTree::Leaf { spec: None } => true,
        ConditionTree::Leaf { spec: Some(spec) } => leaf_truth(spec, mask),
        ConditionTree::Group {
            logic: LogicalOperator::And,
            members,
        } => members.iter().all(|member| eval_reference(member, mask)),
        ConditionTree::Group {
            logic: LogicalOperator::Or,
            members,
        } => members.iter().any(|member| eval_reference(member, mask)),
    }
}

/// 在嵌套结构上删除 `removed`，被清空的分组一并去掉；整棵树被清空时返回 None
fn decode_without(group: &Group, removed: &PathKey) -> Option<ConditionTree> {
    let depth = group.prefix.len();
    let mut slots: Vec<(usize, ConditionTree)> = group
        .leaves
        .iter()
        .filter(|leaf| &leaf.path != removed)
        .map(|leaf| {
            let slot = leaf.path.component(depth).unwrap_or_default();
            (slot, ConditionTree::Leaf {
                spec: leaf.payload.clone(),
            })
        })
        .chain(
            group
                .children
                .iter()
                .filter(|child| &child.prefix != removed)
                .filter_map(|child| {
                    let slot = child.prefix.component(depth)?;
                    Some((slot, decode_without(child, removed)?))
                }),
        )
        .collect();
    slots.sort_by_key(|(slot, _)| *slot);

    if slots.is_empty() {
        return None;
    }
    Some(ConditionTree::Group {
        logic: group.logic,
        members: slots.into_iter().map(|(_, member)| member).collect(),
    })
}

/// 每个子分组的逻辑都与父分组不同
fn alternates(group: &Group) -> bool {
    group
        .children
        .iter()
        .all(|child| child.logic != group.logic && alternates(child))
}

fn group_prefixes(group: &Group, prefixes: &mut Vec<PathKey>) {
    prefixes.push(group.prefix.clone());
    for child in &group.children {
        group_prefixes(child, prefixes);
    }
}

/// 可删除的目标：所有节点路径和非根分组前缀
fn removal_targets(nodes: &[ConditionNode]) -> Vec<PathKey> {
    let mut targets = Vec::new();
    group_prefixes(&TreeBuilder::build(nodes), &mut targets);
    targets.retain(|prefix| !prefix.is_empty());
    targets.extend(nodes.iter().map(|node| node.path.clone()));
    targets
}

#[derive(Debug, Clone)]
enum Edit {
    Add(Index, bool),
    Remove(Index),
    SetLogic(Index, bool),
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (any::<Index>(), any::<bool>()).prop_map(|(i, or)| Edit::Add(i, or)),
        2 => any::<Index>().prop_map(Edit::Remove),
        1 => (any::<Index>(), any::<bool>()).prop_map(|(i, or)| Edit::SetLogic(i, or)),
    ]
}

fn op(or: bool) -> LogicalOperator {
    if or {
        LogicalOperator::Or
    } else {
        LogicalOperator::And
    }
}

fn apply_edit(editor: &GroupEditor, nodes: Vec<ConditionNode>, edit: Edit) -> Vec<ConditionNode> {
    let mut prefixes = Vec::new();
    group_prefixes(&TreeBuilder::build(&nodes), &mut prefixes);

    match edit {
        Edit::Add(index, or) => editor.add_sibling(&nodes, index.get(&prefixes), op(or)).unwrap(),
        Edit::Remove(index) => {
            let targets = removal_targets(&nodes);
            if targets.is_empty() {
                return nodes;
            }
            editor.remove(&nodes, index.get(&targets)).unwrap()
        }
        Edit::SetLogic(index, or) => editor
            .set_logic(&nodes, index.get(&prefixes), op(or))
            .unwrap_or(nodes),
    }
}

proptest! {
    #[test]
    fn build_is_deterministic_and_order_insensitive(
        (nodes, shuffled) in tree_strategy().prop_flat_map(|tree| {
            let nodes = tree.encode();
            (Just(nodes.clone()), Just(nodes).prop_shuffle())
        })
    ) {
        prop_assert_eq!(TreeBuilder::build(&nodes), TreeBuilder::build(&nodes));
        prop_assert_eq!(TreeBuilder::build(&nodes), TreeBuilder::build(&shuffled));
    }

    #[test]
    fn every_tree_round_trips_through_flat_nodes(tree in tree_strategy()) {
        let nodes = tree.encode();
        prop_assert!(RuleValidator::check_nodes(&nodes).is_empty());
        prop_assert_eq!(ConditionTree::decode(&TreeBuilder::build(&nodes)), tree);
    }

    #[test]
    fn flat_evaluation_matches_nested_semantics(tree in tree_strategy(), mask in any::<u16>()) {
        prop_assert_eq!(eval_nodes(&tree.encode(), mask), eval_reference(&tree, mask));
    }

    #[test]
    fn edits_keep_sibling_logic_consistent(
        tree in tree_strategy(),
        edits in prop::collection::vec(edit_strategy(), 1..24),
        unwrap_single_leaf_groups in any::<bool>(),
    ) {
        let editor = GroupEditor::new(EditPolicy {
            unwrap_single_leaf_groups,
            ..Default::default()
        });
        let mut nodes = tree.encode();

        for edit in edits {
            nodes = apply_edit(&editor, nodes, edit);

            let issues = RuleValidator::check_nodes(&nodes);
            prop_assert!(issues.is_empty(), "{:?}", issues);
            prop_assert!(alternates(&TreeBuilder::build(&nodes)));
        }
    }

    #[test]
    fn remove_after_edits_matches_nested_deletion(
        tree in tree_strategy(),
        edits in prop::collection::vec(edit_strategy(), 0..16),
        unwrap_single_leaf_groups in any::<bool>(),
        target in any::<Index>(),
        mask in any::<u16>(),
    ) {
        let editor = GroupEditor::new(EditPolicy {
            unwrap_single_leaf_groups,
            ..Default::default()
        });
        let nodes = edits
            .into_iter()
            .fold(tree.encode(), |nodes, edit| apply_edit(&editor, nodes, edit));

        let targets = removal_targets(&nodes);
        prop_assume!(!targets.is_empty());
        let path = target.get(&targets).clone();
        let expected = decode_without(&TreeBuilder::build(&nodes), &path);

        let removed = editor.remove(&nodes, &path).unwrap();
        prop_assert!(alternates(&TreeBuilder::build(&removed)));
        if let Some(expected) = expected {
            prop_assert_eq!(eval_nodes(&removed, mask), eval_reference(&expected, mask));
        } else {
            prop_assert!(removed.is_empty());
        }
    }

    #[test]
    fn add_then_remove_is_evaluation_equivalent(
        tree in tree_strategy(),
        target in any::<Index>(),
        or in any::<bool>(),
        mask in any::<u16>(),
    ) {
        let editor = GroupEditor::default();
        let original = tree.encode();

        let mut prefixes = Vec::new();
        group_prefixes(&TreeBuilder::build(&original), &mut prefixes);
        let added = editor.add_sibling(&original, target.get(&prefixes), op(or)).unwrap();

        // 以 AND 连接的未配置节点不改变求值结果
        if !or {
            prop_assert_eq!(eval_nodes(&added, mask), eval_nodes(&original, mask));
        }

        let new_path = added.last().unwrap().path.clone();
        let restored = editor.remove(&added, &new_path).unwrap();
        prop_assert_eq!(eval_nodes(&restored, mask), eval_nodes(&original, mask));
    }
}

