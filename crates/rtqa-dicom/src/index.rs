//! 逐文件索引表
//!
//! 外部索引器为每个DICOM文件写出一行元数据，本模块负责读取并按序列分组。

use chrono::NaiveDateTime;
use rtqa_core::{Modality, QaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 索引表中的一行（一个文件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub study_uid: Option<String>,
    pub series_uid: String,
    pub modality: Modality,
    #[serde(default)]
    pub sop_class_uid: Option<String>,
    #[serde(default)]
    pub sop_instance_uid: Option<String>,
    #[serde(default, alias = "for_uid")]
    pub frame_of_reference: Option<String>,
    #[serde(default, alias = "referenced_uid")]
    pub referenced_series: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub date_time: Option<NaiveDateTime>,
    /// 图像层位置，仅CT/MR/PT有值
    #[serde(default)]
    pub slice_location: Option<f64>,
    #[serde(default)]
    pub structure_names: Option<Vec<String>>,
    #[serde(default)]
    pub dose_summation_type: Option<String>,
    /// 模板声明的附加字段
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IndexRow {
    pub fn new(series_uid: impl Into<String>, modality: impl Into<Modality>) -> Self {
        Self {
            patient_id: None,
            study_uid: None,
            series_uid: series_uid.into(),
            modality: modality.into(),
            sop_class_uid: None,
            sop_instance_uid: None,
            frame_of_reference: None,
            referenced_series: None,
            file_path: None,
            date_time: None,
            slice_location: None,
            structure_names: None,
            dose_summation_type: None,
            extra: Map::new(),
        }
    }

    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn with_frame_of_reference(mut self, frame_of_reference: impl Into<String>) -> Self {
        self.frame_of_reference = Some(frame_of_reference.into());
        self
    }

    pub fn with_referenced_series(mut self, referenced_series: impl Into<String>) -> Self {
        self.referenced_series = Some(referenced_series.into());
        self
    }

    pub fn with_slice_location(mut self, slice_location: f64) -> Self {
        self.slice_location = Some(slice_location);
        self
    }
}

/// 索引表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexTable {
    rows: Vec<IndexRow>,
}

impl IndexTable {
    pub fn new(rows: Vec<IndexRow>) -> Self {
        Self { rows }
    }

    /// 从JSON数组解析索引表；缺少必需列时直接报错
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| QaError::Index(format!("索引表无法解析: {}", e)))
    }

    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 出现过的患者ID（去重，保持首次出现顺序）
    pub fn patient_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.rows.iter().filter_map(|r| r.patient_id.as_deref()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// 按序列UID分组，按UID升序
    pub fn group_by_series(&self) -> BTreeMap<&str, Vec<&IndexRow>> {
        let mut groups: BTreeMap<&str, Vec<&IndexRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.series_uid.as_str()).or_default().push(row);
        }
        groups
    }

    /// 表中是否存在给定序列
    pub fn contains_series(&self, series_uid: &str) -> bool {
        self.rows.iter().any(|r| r.series_uid == series_uid)
    }
}
