//! 规则条件引擎
//!
//! 规则的条件以扁平的节点列表持久化，每个节点通过路径前缀隐式归属于嵌套的 AND/OR 分组。
//! 提供：
//! - 从扁平列表重建条件树（`TreeBuilder`）
//! - 保持运算符一致的结构编辑（`GroupEditor`）
//! - 短路求值，占位节点不阻塞匹配（`TreeEvaluator`）
//! - 按生效时间过滤并汇总动作的规则管道（`RulePipeline`）

pub mod catalog;
pub mod comparator;
pub mod context;
pub mod editor;
pub mod error;
pub mod evaluator;
pub mod models;
pub mod operators;
pub mod path;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod tree;
pub mod validator;

pub use context::{ConditionContext, JsonContext};
pub use editor::{EditPolicy, GroupEditor, LockedSlots};
pub use error::{EngineError, Result};
pub use evaluator::{Evaluation, TreeEvaluator, evaluate, try_evaluate};
pub use models::{ActionSpec, ConditionNode, LeafSpec, NodeId, Rule};
pub use operators::{LogicalOperator, Operator};
pub use path::PathKey;
pub use pipeline::{PipelineOutcome, RuleFailure, RulePipeline};
pub use registry::{LeafEvaluator, LeafRegistry, LeafValidation};
pub use store::{RuleStore, RuleStoreStats, parse_rules};
pub use tree::{ConditionTree, Group, TreeBuilder};
pub use validator::RuleValidator;
