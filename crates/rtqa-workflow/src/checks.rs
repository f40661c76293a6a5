//! 检查计划
//!
//! 模板中的检查在运行前统一编译：未知函数、参数错误或无效运算符都会在任何匹配和检查之前报错。

use crate::registry::{CheckRegistry, Predicate};
use rtqa_core::{CheckDefinition, CheckResult, Result, RunReporter, SeriesCollection};

const MODULE: &str = "check";

/// 编译后的单项检查
#[derive(Debug)]
pub struct CompiledCheck {
    pub description: String,
    pub labels: Vec<String>,
    pub critical: bool,
    predicate: Box<dyn Predicate>,
}

impl CompiledCheck {
    /// 对结果文档评估本检查
    pub fn evaluate(&self, collection: &SeriesCollection) -> CheckResult {
        let selected = collection.select(&self.labels);
        let outcome = self.predicate.evaluate(&selected);
        CheckResult {
            description: self.description.clone(),
            passed: outcome.passed,
            output: outcome.output,
            critical: self.critical,
        }
    }
}

/// 检查计划，按模板声明顺序执行
#[derive(Debug, Default)]
pub struct CheckPlan {
    checks: Vec<CompiledCheck>,
}

impl CheckPlan {
    pub fn compile(definitions: &[CheckDefinition], registry: &CheckRegistry) -> Result<Self> {
        let checks = definitions
            .iter()
            .map(|definition| {
                let predicate = registry.instantiate(&definition.function, &definition.args)?;
                Ok(CompiledCheck {
                    description: definition.description.clone(),
                    labels: definition.series.labels(),
                    critical: definition.critical,
                    predicate,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { checks })
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn checks(&self) -> &[CompiledCheck] {
        &self.checks
    }

    /// 执行全部检查，不因失败而中断
    pub fn evaluate(
        &self,
        collection: &SeriesCollection,
        reporter: &dyn RunReporter,
    ) -> Vec<CheckResult> {
        self.checks
            .iter()
            .map(|check| {
                let result = check.evaluate(collection);
                let verdict = if result.passed { "passed" } else { "failed" };
                reporter.info(MODULE, format!("Check '{}' {}", result.description, verdict));
                if !result.output.is_empty() {
                    reporter.warn(MODULE, format!("  - {}", result.output));
                }
                result
            })
            .collect()
    }

    /// 执行检查并将结果写入文档，替换上一次的结果
    pub fn apply(
        &self,
        collection: &mut SeriesCollection,
        reporter: &dyn RunReporter,
    ) -> Vec<CheckResult> {
        let results = self.evaluate(collection, reporter);
        collection.checks = Some(results.clone());
        results
    }
}
