//! 规则条件引擎命令行
//!
//! 读取规则文件和上下文文件，输出命中的动作、条件树或校验结果。

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rule_engine::{
    EditPolicy, GroupEditor, JsonContext, LogicalOperator, PathKey, Rule, RulePipeline,
    RuleStore, RuleValidator, TreeBuilder, parse_rules,
};
use rules_shared::config::AppConfig;
use rules_shared::observability;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rule-engine", author, version, about = "规则条件引擎")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 评估规则，输出命中的动作
    Evaluate {
        /// 规则文件（单条规则或规则数组）
        #[arg(short, long)]
        rules: PathBuf,

        /// 上下文 JSON 文件
        #[arg(short, long)]
        context: PathBuf,

        /// 参考时间（RFC 3339），默认当前时间
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,

        /// 只评估该商户的规则
        #[arg(short, long)]
        member: Option<String>,

        /// 输出 Prometheus 指标快照
        #[arg(long)]
        metrics: bool,
    },

    /// 打印规则的条件树
    Tree {
        #[arg(short, long)]
        rules: PathBuf,

        /// 规则 ID
        #[arg(long)]
        rule: String,
    },

    /// 校验规则文件
    Validate {
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// 编辑规则条件，输出编辑后的节点列表
    Edit {
        #[arg(short, long)]
        rules: PathBuf,

        #[arg(long)]
        rule: String,

        #[command(subcommand)]
        action: EditAction,
    },
}

#[derive(Subcommand, Debug)]
enum EditAction {
    /// 在分组中添加占位条件
    Add {
        /// 分组路径，如 "0.1"，根分组为 "root"
        #[arg(short, long, default_value = "root")]
        group: PathKey,

        #[arg(short, long, value_enum, default_value_t = LogicArg::And)]
        logic: LogicArg,
    },

    /// 删除节点或分组
    Remove {
        /// 节点或分组路径，如 "1" 或 "0.1"
        path: PathKey,
    },

    /// 切换分组的连接运算符
    SetLogic {
        #[arg(short, long, default_value = "root")]
        group: PathKey,

        #[arg(short, long, value_enum)]
        logic: LogicArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogicArg {
    And,
    Or,
}

impl From<LogicArg> for LogicalOperator {
    fn from(arg: LogicArg) -> Self {
        match arg {
            LogicArg::And => LogicalOperator::And,
            LogicArg::Or => LogicalOperator::Or,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("rule-condition-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    let guard = observability::init(&config.service_name, &config.observability)?;

    match cli.command {
        Commands::Evaluate {
            rules,
            context,
            as_of,
            member,
            metrics,
        } => {
            let mut pipeline = RulePipeline::default();
            if config.engine.trace_evaluation {
                pipeline = pipeline.with_trace();
            }

            let rules = load_rules(&rules)?;
            let context = JsonContext::new(read_json(&context)?);
            let as_of = as_of.unwrap_or_else(Utc::now);

            let outcome = match member {
                Some(member_id) => {
                    let store = RuleStore::new(RuleValidator::default(), pipeline);
                    store.load_batch(rules);
                    store.evaluate(&member_id, &context, as_of)
                }
                None => pipeline.evaluate_rules(&rules, &context, as_of),
            };

            for failure in &outcome.failures {
                warn!(rule_id = %failure.rule_id, code = failure.code, "{}", failure.message);
            }
            print_json(&outcome)?;

            if metrics {
                match guard.render_metrics() {
                    Some(snapshot) => println!("{}", snapshot),
                    None => warn!("指标未启用，无法输出快照"),
                }
            }
        }

        Commands::Tree { rules, rule } => {
            let rule = find_rule(&load_rules(&rules)?, &rule)?;
            print_json(&TreeBuilder::build(&rule.nodes))?;
        }

        Commands::Validate { rules } => {
            let rules = load_rules(&rules)?;
            let validator = RuleValidator::default();

            let report: Vec<ValidationReport> = rules
                .iter()
                .map(|rule| ValidationReport {
                    rule_id: rule.id.clone(),
                    issues: match validator.validate(rule) {
                        Ok(()) => Vec::new(),
                        Err(rule_engine::EngineError::ValidationFailed { issues, .. }) => issues,
                        Err(other) => vec![other.to_string()],
                    },
                })
                .collect();
            print_json(&report)?;

            let invalid = report.iter().filter(|r| !r.issues.is_empty()).count();
            if invalid > 0 {
                bail!("{} 条规则校验失败", invalid);
            }
            info!("{} 条规则校验通过", report.len());
        }

        Commands::Edit { rules, rule, action } => {
            let rule = find_rule(&load_rules(&rules)?, &rule)?;
            let editor = GroupEditor::new(EditPolicy::from_config(&config.engine));

            let nodes = match action {
                EditAction::Add { group, logic } => {
                    editor.add_sibling(&rule.nodes, &group, logic.into())?
                }
                EditAction::Remove { path } => editor.remove(&rule.nodes, &path)?,
                EditAction::SetLogic { group, logic } => {
                    editor.set_logic(&rule.nodes, &group, logic.into())?
                }
            };
            print_json(&nodes)?;
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    rule_id: String,
    issues: Vec<String>,
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("无法读取文件 {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("无法解析 JSON {}", path.display()))
}

fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("无法读取规则文件 {}", path.display()))?;
    let rules = parse_rules(&content)?;
    info!("从 {} 读取 {} 条规则", path.display(), rules.len());
    Ok(rules)
}

fn find_rule(rules: &[Rule], rule_id: &str) -> Result<Rule> {
    rules
        .iter()
        .find(|rule| rule.id == rule_id)
        .cloned()
        .with_context(|| format!("规则未找到: {}", rule_id))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
