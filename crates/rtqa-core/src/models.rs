//! 核心数据模型定义
//!
//! 结果文档（`series.json`）在索引、匹配、检查三个阶段之间传递，
//! 这里的结构就是它的持久化契约。

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 模态代码
///
/// 常见放疗模态使用具名变体，其余代码原样保存在 `Other` 中。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Modality {
    Ct,
    Mr,
    Pt,
    RtStruct,
    RtPlan,
    RtDose,
    Other(String),
}

impl Modality {
    /// 模态代码字符串
    pub fn as_str(&self) -> &str {
        match self {
            Modality::Ct => "CT",
            Modality::Mr => "MR",
            Modality::Pt => "PT",
            Modality::RtStruct => "RTSTRUCT",
            Modality::RtPlan => "RTPLAN",
            Modality::RtDose => "RTDOSE",
            Modality::Other(code) => code,
        }
    }

    /// 是否为图像类模态（需要检查层间距）
    pub fn is_image(&self) -> bool {
        matches!(self, Modality::Ct | Modality::Mr | Modality::Pt)
    }

    /// 结果文档中的排序位置，未知模态排在最后
    pub fn display_rank(&self) -> usize {
        match self {
            Modality::Ct => 0,
            Modality::Mr => 1,
            Modality::Pt => 2,
            Modality::RtStruct => 3,
            Modality::RtPlan => 4,
            Modality::RtDose => 5,
            Modality::Other(_) => 6,
        }
    }
}

impl From<String> for Modality {
    fn from(code: String) -> Self {
        match code.as_str() {
            "CT" => Modality::Ct,
            "MR" => Modality::Mr,
            "PT" => Modality::Pt,
            "RTSTRUCT" => Modality::RtStruct,
            "RTPLAN" => Modality::RtPlan,
            "RTDOSE" => Modality::RtDose,
            _ => Modality::Other(code),
        }
    }
}

impl From<&str> for Modality {
    fn from(code: &str) -> Self {
        Modality::from(code.to_string())
    }
}

impl From<Modality> for String {
    fn from(modality: Modality) -> Self {
        modality.as_str().to_string()
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个序列的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    /// 序列实例UID，在集合内唯一
    pub series_uid: String,
    pub modality: Modality,
    #[serde(default)]
    pub date_time: Option<NaiveDateTime>,
    /// 参考坐标系UID
    #[serde(default)]
    pub frame_of_reference: Option<String>,
    /// 引用的序列UID（单值）
    #[serde(default)]
    pub referenced_series: Option<String>,
    #[serde(default)]
    pub instance_count: usize,
    /// RTSTRUCT 的结构名称，保持原始顺序
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_names: Option<Vec<String>>,
    /// RTDOSE 的剂量累加类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose_summation_type: Option<String>,
    /// 匹配到的模板节点名称
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_label: Option<String>,
    /// 模板声明的附加元数据
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl SeriesRecord {
    /// 创建只有必需字段的序列记录
    pub fn new(series_uid: impl Into<String>, modality: impl Into<Modality>) -> Self {
        Self {
            series_uid: series_uid.into(),
            modality: modality.into(),
            date_time: None,
            frame_of_reference: None,
            referenced_series: None,
            instance_count: 0,
            structure_names: None,
            dose_summation_type: None,
            match_label: None,
            meta: Map::new(),
        }
    }

    pub fn with_frame_of_reference(mut self, frame_of_reference: impl Into<String>) -> Self {
        self.frame_of_reference = Some(frame_of_reference.into());
        self
    }

    pub fn with_referenced_series(mut self, referenced_series: impl Into<String>) -> Self {
        self.referenced_series = Some(referenced_series.into());
        self
    }

    pub fn with_structure_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.structure_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_match(mut self, label: impl Into<String>) -> Self {
        self.match_label = Some(label.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// 按文档中的键名读取属性
    ///
    /// 文档中始终写出的字段（如 `frame_of_reference`）即使为空也返回 `Some(Value::Null)`；
    /// 只有键本身不存在时才返回 `None`。
    pub fn attribute(&self, key: &str) -> Option<Value> {
        match key {
            "series_uid" => Some(Value::String(self.series_uid.clone())),
            "modality" => Some(Value::String(self.modality.to_string())),
            // 与文档中序列化的写法一致，保留小数秒
            "date_time" => Some(
                self.date_time
                    .and_then(|dt| serde_json::to_value(dt).ok())
                    .unwrap_or(Value::Null),
            ),
            "frame_of_reference" => Some(optional_string(&self.frame_of_reference)),
            "referenced_series" => Some(optional_string(&self.referenced_series)),
            "instance_count" => Some(Value::from(self.instance_count)),
            "structure_names" => self
                .structure_names
                .as_ref()
                .map(|names| Value::from(names.clone())),
            "dose_summation_type" => self
                .dose_summation_type
                .as_ref()
                .map(|v| Value::String(v.clone())),
            "match" => self.match_label.as_ref().map(|v| Value::String(v.clone())),
            _ => self.meta.get(key).cloned(),
        }
    }

    /// 是否带有给定集合中的任一匹配标签
    pub fn is_labelled_with(&self, labels: &[String]) -> bool {
        self.match_label
            .as_ref()
            .map(|label| labels.iter().any(|l| l == label))
            .unwrap_or(false)
    }
}

fn optional_string(value: &Option<String>) -> Value {
    value
        .as_ref()
        .map(|v| Value::String(v.clone()))
        .unwrap_or(Value::Null)
}

/// 单项检查的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub description: String,
    pub passed: bool,
    /// 诊断输出，可能多行；全部通过时为空
    pub output: String,
    #[serde(default)]
    pub critical: bool,
}

/// 单个患者的序列集合（结果文档）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesCollection {
    pub patient_id: String,
    pub series: Vec<SeriesRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<CheckResult>>,
}

impl SeriesCollection {
    pub fn new(patient_id: impl Into<String>, series: Vec<SeriesRecord>) -> Self {
        Self {
            patient_id: patient_id.into(),
            series,
            checks: None,
        }
    }

    /// 为给定UID的所有记录写入匹配标签，返回更新的记录数
    pub fn assign_match(&mut self, series_uid: &str, label: &str) -> usize {
        let mut updated = 0;
        for series in self.series.iter_mut().filter(|s| s.series_uid == series_uid) {
            series.match_label = Some(label.to_string());
            updated += 1;
        }
        updated
    }

    /// 选出匹配标签属于给定集合的序列，保持文档顺序
    pub fn select(&self, labels: &[String]) -> Vec<&SeriesRecord> {
        self.series
            .iter()
            .filter(|s| s.is_labelled_with(labels))
            .collect()
    }

    /// 失败的关键检查数量
    pub fn critical_failures(&self) -> usize {
        self.checks
            .as_ref()
            .map(|checks| checks.iter().filter(|c| c.critical && !c.passed).count())
            .unwrap_or(0)
    }
}
