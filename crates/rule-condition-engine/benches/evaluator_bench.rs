//! 条件树性能基准测试
//!
//! 覆盖值比较、扁平节点构建条件树、条件树求值以及规则管道评估。

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rule_engine::comparator::ValueComparator;
use rule_engine::{
    ActionSpec, ConditionNode, ConditionTree, JsonContext, LeafRegistry, LeafSpec,
    LogicalOperator, Operator, Rule, RulePipeline, TreeBuilder, evaluate,
};
use serde_json::json;
use std::hint::black_box;

fn amount_leaf(threshold: usize) -> ConditionTree {
    ConditionTree::leaf(LeafSpec::OrderAmount {
        operator: Operator::Gte,
        value: json!(threshold),
    })
}

/// 生成 `groups` 个 AND 子分组组成的 OR 条件，每个子分组含 `leaves` 个叶子
fn create_nodes(groups: usize, leaves: usize) -> Vec<ConditionNode> {
    ConditionTree::or(
        (0..groups)
            .map(|g| ConditionTree::and((0..leaves).map(|l| amount_leaf(g * leaves + l)).collect()))
            .collect(),
    )
    .encode()
}

fn create_context() -> JsonContext {
    JsonContext::new(json!({
        "order": {"source": "BUYER", "amount": 150},
        "buyer": {"fields": {"membership": "gold", "visits": 12}},
        "appointment": {"start": "2024-06-01T09:00:00Z"},
        "provider": {"id": "stylist-7"}
    }))
}

fn bench_comparator(c: &mut Criterion) {
    let mut group = c.benchmark_group("comparator");

    let number = json!(1000);
    let threshold = json!(500);
    group.bench_function("gt", |b| {
        b.iter(|| {
            ValueComparator::compare(
                black_box(Some(&number)),
                black_box(Operator::Gt),
                black_box(&threshold),
            )
        })
    });

    let list = json!(["BUYER", "VENDOR", "ADMIN"]);
    let source = json!("VENDOR");
    group.bench_function("in", |b| {
        b.iter(|| {
            ValueComparator::compare(
                black_box(Some(&source)),
                black_box(Operator::In),
                black_box(&list),
            )
        })
    });

    group.finish();
}

fn bench_tree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_build");

    for size in [1, 5, 20, 50] {
        let mut nodes = create_nodes(size, 4);
        nodes.reverse();
        group.bench_with_input(BenchmarkId::new("groups", size), &nodes, |b, nodes| {
            b.iter(|| TreeBuilder::build(black_box(nodes)))
        });
    }

    group.finish();
}

fn bench_tree_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_evaluate");
    let registry = LeafRegistry::builtin();
    let context = create_context();

    for size in [1, 5, 20, 50] {
        let tree = TreeBuilder::build(&create_nodes(size, 4));
        group.bench_with_input(BenchmarkId::new("groups", size), &tree, |b, tree| {
            b.iter(|| {
                evaluate(black_box(tree), &context, |spec, ctx| {
                    registry.evaluate(spec, ctx).unwrap_or(false)
                })
            })
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let pipeline = RulePipeline::default();
    let context = create_context();
    let as_of = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    for count in [10, 100] {
        let rules: Vec<Rule> = (0..count)
            .map(|i| {
                let mut rule = Rule::new(
                    "salon-42",
                    format!("rule-{}", i),
                    create_nodes(2, 3),
                    vec![ActionSpec::new("surcharge", json!({"percent": 5}))],
                );
                rule.created_at = as_of - chrono::Duration::days(1);
                rule
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("rules", count), &rules, |b, rules| {
            b.iter(|| pipeline.evaluate_rules(black_box(rules), &context, as_of))
        });
    }

    group.finish();
}

/// 编辑操作都会重建整棵树，规模较大时单独观察
fn bench_edit(c: &mut Criterion) {
    let editor = rule_engine::GroupEditor::default();
    let nodes = create_nodes(20, 4);

    c.bench_function("edit/add_and_remove", |b| {
        b.iter(|| {
            let added = editor
                .add_sibling(black_box(&nodes), &rule_engine::PathKey::root(), LogicalOperator::And)
                .unwrap();
            let path = added.last().unwrap().path.clone();
            editor.remove(&added, &path).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_comparator,
    bench_tree_build,
    bench_tree_evaluate,
    bench_pipeline,
    bench_edit
);
criterion_main!(benches);
