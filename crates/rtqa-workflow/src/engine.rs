//! 协议引擎
//!
//! 协调索引校验、结果文档构建、序列匹配和检查执行的核心引擎

use crate::{
    checks::CheckPlan,
    expected::TemplateGraph,
    matcher::{CorrespondenceMatcher, MatchAssignments},
    observed::ObservedGraph,
    registry::CheckRegistry,
};
use rtqa_core::{CheckResult, QaError, Result, RunReporter, SeriesCollection, Template};
use rtqa_dicom::{IndexTable, IndexValidator, SeriesCollectionBuilder};
use serde::{Deserialize, Serialize};

const MODULE: &str = "engine";

/// 协议引擎
///
/// 构造时完成模板图和检查计划的编译，模板或检查配置有误时在处理任何数据之前就失败。
#[derive(Debug)]
pub struct ProtocolEngine {
    template: Template,
    template_graph: TemplateGraph,
    plan: CheckPlan,
    validate_index: bool,
}

impl ProtocolEngine {
    /// 使用内置检查创建引擎
    pub fn new(template: Template) -> Result<Self> {
        Self::with_registry(template, &CheckRegistry::with_builtins())
    }

    /// 使用自定义注册表创建引擎
    pub fn with_registry(template: Template, registry: &CheckRegistry) -> Result<Self> {
        let template_graph = TemplateGraph::build(&template)?;
        let plan = CheckPlan::compile(&template.checks, registry)?;

        tracing::debug!(
            "协议引擎就绪: {} 个期望序列, {} 项检查",
            template_graph.node_count(),
            plan.len()
        );

        Ok(Self {
            template,
            template_graph,
            plan,
            validate_index: true,
        })
    }

    /// 构建结果文档前是否校验索引表，默认校验
    pub fn with_index_validation(mut self, enabled: bool) -> Self {
        self.validate_index = enabled;
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn template_graph(&self) -> &TemplateGraph {
        &self.template_graph
    }

    pub fn plan(&self) -> &CheckPlan {
        &self.plan
    }

    /// 校验索引表并构建结果文档
    ///
    /// 校验错误直接失败，警告只记录到报告器。
    pub fn build_collection(
        &self,
        table: &IndexTable,
        reporter: &dyn RunReporter,
    ) -> Result<SeriesCollection> {
        if self.validate_index {
            self.validate(table, reporter)?;
        }
        SeriesCollectionBuilder::new(self.template.meta.clone()).build(table)
    }

    fn validate(&self, table: &IndexTable, reporter: &dyn RunReporter) -> Result<()> {
        let validation = IndexValidator::new().validate_table(table);
        for warning in &validation.warnings {
            reporter.warn(MODULE, warning.clone());
        }
        if validation.has_errors() {
            return Err(QaError::Index(validation.errors.join("; ")));
        }
        reporter.debug(MODULE, validation.get_summary());
        Ok(())
    }

    /// 匹配并写回标签
    pub fn match_series(
        &self,
        collection: &mut SeriesCollection,
        observed: &ObservedGraph,
        reporter: &dyn RunReporter,
    ) -> MatchAssignments {
        let matches = CorrespondenceMatcher::new(&self.template_graph, observed).run(reporter);
        let written = matches.apply_to(collection);
        reporter.debug(MODULE, format!("写入 {} 个匹配标签", written));
        matches
    }

    /// 以结果文档本身作为实际序列图进行匹配
    pub fn match_collection(
        &self,
        collection: &mut SeriesCollection,
        reporter: &dyn RunReporter,
    ) -> MatchAssignments {
        let observed = ObservedGraph::from_collection(collection);
        self.match_series(collection, &observed, reporter)
    }

    /// 执行检查并写入结果文档
    pub fn run_checks(
        &self,
        collection: &mut SeriesCollection,
        reporter: &dyn RunReporter,
    ) -> Vec<CheckResult> {
        self.plan.apply(collection, reporter)
    }

    /// 完整处理一个目录的索引表：构建、匹配、检查
    pub fn process(
        &self,
        table: &IndexTable,
        reporter: &dyn RunReporter,
    ) -> Result<(SeriesCollection, ProtocolReport)> {
        let mut collection = self.build_collection(table, reporter)?;
        let observed = ObservedGraph::from_index(table);
        let matches = self.match_series(&mut collection, &observed, reporter);
        self.run_checks(&mut collection, reporter);

        let report = ProtocolReport::from_collection(&collection, &matches);
        reporter.info(
            MODULE,
            format!(
                "患者 {}: {} 项检查通过, {} 项失败, 关键失败 {}",
                report.patient_id, report.checks_passed, report.checks_failed, report.critical_failures
            ),
        );
        Ok((collection, report))
    }
}

/// 单个患者的处理概览
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolReport {
    pub patient_id: String,
    pub series_count: usize,
    /// 至少匹配到一个序列的标签
    pub matched_labels: Vec<String>,
    /// 没有任何标签的序列
    pub unmatched_series: Vec<String>,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub critical_failures: usize,
}

impl ProtocolReport {
    pub fn from_collection(collection: &SeriesCollection, matches: &MatchAssignments) -> Self {
        let checks = collection.checks.as_deref().unwrap_or_default();
        let checks_passed = checks.iter().filter(|c| c.passed).count();

        Self {
            patient_id: collection.patient_id.clone(),
            series_count: collection.series.len(),
            matched_labels: matches
                .iter()
                .filter(|(_, uids)| !uids.is_empty())
                .map(|(label, _)| label.to_string())
                .collect(),
            unmatched_series: collection
                .series
                .iter()
                .filter(|s| s.match_label.is_none())
                .map(|s| s.series_uid.clone())
                .collect(),
            checks_passed,
            checks_failed: checks.len() - checks_passed,
            critical_failures: collection.critical_failures(),
        }
    }

    pub fn is_conformant(&self) -> bool {
        self.critical_failures == 0
    }
}
