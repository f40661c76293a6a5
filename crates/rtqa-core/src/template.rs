//! 协议模板定义
//!
//! 模板描述期望的序列（及其引用关系）、需要执行的检查以及要从索引中带出的元数据字段。
//! 期望序列的声明顺序会被保留，匹配器依赖这一顺序得到确定的结果。

use crate::error::{QaError, Result};
use crate::models::Modality;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// 期望序列节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedSeries {
    /// 节点名称，即写入结果文档的匹配标签
    #[serde(skip)]
    pub name: String,
    pub modality: Modality,
    /// 被引用的另一个期望节点名称
    #[serde(
        rename = "referencedSeries",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub referenced_series: Option<String>,
}

/// 检查所选序列的标签，可以是单个或多个
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesSelector {
    One(String),
    Many(Vec<String>),
}

impl SeriesSelector {
    /// 展开为标签列表
    pub fn labels(&self) -> Vec<String> {
        match self {
            SeriesSelector::One(label) => vec![label.clone()],
            SeriesSelector::Many(labels) => labels.clone(),
        }
    }
}

/// 检查定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub description: String,
    pub series: SeriesSelector,
    /// 检查函数标识
    pub function: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub critical: bool,
}

/// 协议模板
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    /// 按声明顺序排列的期望序列
    pub expected_series: Vec<ExpectedSeries>,
    pub checks: Vec<CheckDefinition>,
    /// 需要从索引表带入结果文档的附加字段
    pub meta: Vec<String>,
}

#[derive(Deserialize)]
struct RawTemplate {
    expected_series: Map<String, Value>,
    #[serde(default)]
    checks: Vec<Value>,
    #[serde(default)]
    meta: Vec<String>,
}

impl Template {
    /// 从JSON文本解析模板
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// 从JSON值解析模板，并完成结构校验
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawTemplate = serde_json::from_value(value)
            .map_err(|e| QaError::Template(format!("模板结构无效: {}", e)))?;

        let mut expected_series = Vec::with_capacity(raw.expected_series.len());
        for (name, definition) in raw.expected_series {
            let mut expected: ExpectedSeries = serde_json::from_value(definition)
                .map_err(|e| QaError::Template(format!("期望序列 {} 定义无效: {}", name, e)))?;
            expected.name = name;
            expected_series.push(expected);
        }

        let mut checks = Vec::with_capacity(raw.checks.len());
        for (index, check) in raw.checks.into_iter().enumerate() {
            let check: CheckDefinition = serde_json::from_value(check)
                .map_err(|e| QaError::Template(format!("第 {} 项检查定义无效: {}", index + 1, e)))?;
            checks.push(check);
        }

        let template = Self {
            expected_series,
            checks,
            meta: raw.meta,
        };
        template.validate()?;
        Ok(template)
    }

    /// 校验引用关系：被引用的节点必须存在
    pub fn validate(&self) -> Result<()> {
        let names: HashSet<&str> = self.expected_series.iter().map(|e| e.name.as_str()).collect();

        for expected in &self.expected_series {
            if let Some(target) = &expected.referenced_series {
                if !names.contains(target.as_str()) {
                    return Err(QaError::Template(format!(
                        "期望序列 {} 引用了未定义的序列 {}",
                        expected.name, target
                    )));
                }
            }
        }

        Ok(())
    }

    /// 按名称查找期望序列
    pub fn expected(&self, name: &str) -> Option<&ExpectedSeries> {
        self.expected_series.iter().find(|e| e.name == name)
    }
}
