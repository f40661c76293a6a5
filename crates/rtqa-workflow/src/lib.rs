//! # RTQA工作流模块
//!
//! 提供协议一致性检查的处理流程，包括：
//! - 序列图：实际序列图与模板期望图
//! - 对应匹配：为实际序列写入模板节点标签
//! - 检查注册表：按标识查找检查谓词
//! - 协议引擎：串联构建、匹配和检查

pub mod checks;
pub mod engine;
pub mod expected;
pub mod graph;
pub mod matcher;
pub mod observed;
pub mod predicates;
pub mod registry;

// 重新导出主要类型
pub use checks::{CheckPlan, CompiledCheck};
pub use engine::{ProtocolEngine, ProtocolReport};
pub use expected::TemplateGraph;
pub use graph::DiGraph;
pub use matcher::{CorrespondenceMatcher, MatchAssignments};
pub use observed::{ObservedGraph, ObservedNode};
pub use predicates::CountOperator;
pub use registry::{CheckOutcome, CheckRegistry, Predicate, PredicateFactory};
