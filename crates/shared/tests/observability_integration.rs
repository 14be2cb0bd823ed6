//! 可观测性模块集成测试
//!
//! recorder 是进程级全局状态，安装和渲染放在同一个测试里完成。

use rules_shared::observability::metrics::{
    self, record_rule_evaluation, record_rule_failure, record_unknown_leaf_type,
};

#[test]
fn test_recorder_renders_rule_metrics() {
    let handle = metrics::init("observability-test").unwrap();

    record_rule_evaluation(true, 0.002);
    record_rule_evaluation(false, 0.001);
    record_rule_failure("FIELD_NOT_FOUND");
    record_unknown_leaf_type("weather");

    let snapshot = handle.render();
    assert!(snapshot.contains("rule_evaluations_total"));
    assert!(snapshot.contains("rule_matches_total"));
    assert!(snapshot.contains(r#"rule_evaluation_failures_total{code="FIELD_NOT_FOUND"} 1"#));
    assert!(snapshot.contains(r#"unknown_leaf_type_total{kind="weather"} 1"#));

    // 重复初始化复用已安装的 recorder
    assert!(metrics::init("observability-test").is_ok());
    assert!(metrics::render().is_some());
}
