//! 索引数据验证模块
//!
//! 在构建结果文档之前检查索引表的完整性与合规性

use crate::index::{IndexRow, IndexTable};
use rtqa_core::utils::is_valid_dicom_uid;
use tracing::{debug, info};

/// 常见的DICOM模态代码
const KNOWN_MODALITIES: &[&str] = &[
    "CR", "CT", "DX", "ES", "MG", "MR", "NM", "OT", "PT", "RF", "SC", "US", "XA", "XC",
    "RTIMAGE", "RTDOSE", "RTSTRUCT", "RTPLAN", "RTRECORD", "RTION", "HC", "ST", "SEG", "REG",
    "DOC", "OP", "OPT", "SMR", "VA", "XRT",
];

/// 索引表验证器
#[derive(Debug, Default)]
pub struct IndexValidator;

impl IndexValidator {
    /// 创建新的索引验证器
    pub fn new() -> Self {
        Self
    }

    /// 验证整张索引表
    pub fn validate_table(&self, table: &IndexTable) -> ValidationResult {
        let mut result = ValidationResult::new();

        info!("开始验证索引表: {} 行", table.len());

        if table.is_empty() {
            result.add_error("索引表为空".to_string());
            return result;
        }

        // 1. 每个目录只允许一个患者
        self.validate_patient(table, &mut result);

        // 2. 逐行验证
        for row in table.rows() {
            self.validate_required_uids(row, &mut result);
            self.validate_modality(row, &mut result);
            self.validate_references(row, &mut result);
            self.validate_image_position(row, &mut result);
        }

        info!(
            "索引表验证完成: {} 个错误, {} 个警告",
            result.errors.len(),
            result.warnings.len()
        );

        result
    }

    /// 验证患者信息
    fn validate_patient(&self, table: &IndexTable, result: &mut ValidationResult) {
        let missing = table.rows().iter().filter(|r| r.patient_id.is_none()).count();
        if missing > 0 {
            result.add_error(format!("{} 行缺少患者ID", missing));
        }

        let patients = table.patient_ids();
        if patients.len() > 1 {
            result.add_error(format!(
                "每个目录只允许一个患者，发现: {}",
                patients.join(", ")
            ));
        }
    }

    /// 验证UID
    ///
    /// UID只作为不透明标识使用，格式不规范只记警告；序列UID为空才是错误。
    fn validate_required_uids(&self, row: &IndexRow, result: &mut ValidationResult) {
        if row.series_uid.trim().is_empty() {
            result.add_error("序列实例UID不能为空".to_string());
        } else if !is_valid_dicom_uid(&row.series_uid) {
            result.add_warning(format!("序列实例UID格式不规范: {}", row.series_uid));
        }

        match &row.sop_instance_uid {
            Some(uid) if is_valid_dicom_uid(uid) => {
                debug!("SOP实例UID验证通过: {}", uid);
            }
            Some(uid) => {
                result.add_warning(format!("SOP实例UID格式不规范: {}", uid));
            }
            None => {
                result.add_warning(format!("序列 {} 中有文件缺少SOP实例UID", row.series_uid));
            }
        }
    }

    /// 验证模态
    fn validate_modality(&self, row: &IndexRow, result: &mut ValidationResult) {
        let code = row.modality.as_str();
        if code.trim().is_empty() {
            result.add_error(format!("序列 {} 模态信息缺失", row.series_uid));
        } else if !KNOWN_MODALITIES.contains(&code) {
            result.add_warning(format!("模态代码可能无效: {}", code));
        }
    }

    /// 验证引用UID格式，只记警告；悬空引用在建图时忽略，这里不报告
    fn validate_references(&self, row: &IndexRow, result: &mut ValidationResult) {
        let uid_fields = [
            ("参考坐标系UID", &row.frame_of_reference),
            ("引用序列UID", &row.referenced_series),
        ];

        for (name, uid_field) in uid_fields {
            if let Some(uid) = uid_field {
                if !is_valid_dicom_uid(uid) {
                    result.add_warning(format!("{}格式不规范: {}", name, uid));
                }
            }
        }
    }

    /// 图像序列需要层位置才能计算层间距
    fn validate_image_position(&self, row: &IndexRow, result: &mut ValidationResult) {
        if row.modality.is_image() && row.slice_location.is_none() {
            result.add_warning(format!("图像序列 {} 中有文件缺少层位置", row.series_uid));
        }
    }
}

/// 验证结果
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// 验证错误列表
    pub errors: Vec<String>,
    /// 验证警告列表
    pub warnings: Vec<String>,
    /// 是否通过验证
    pub is_valid: bool,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    /// 同一警告只保留一次
    pub fn add_warning(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// 获取验证报告摘要
    pub fn get_summary(&self) -> String {
        if self.is_valid {
            if self.has_warnings() {
                format!("验证通过，但有 {} 个警告", self.warnings.len())
            } else {
                "验证完全通过".to_string()
            }
        } else {
            format!(
                "验证失败：{} 个错误，{} 个警告",
                self.errors.len(),
                self.warnings.len()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ct_row(uid: &str) -> IndexRow {
        let mut row = IndexRow::new(uid, "CT")
            .with_patient("P1")
            .with_frame_of_reference("1.2.3")
            .with_slice_location(0.0);
        row.sop_instance_uid = Some(format!("{}.1", uid));
        row
    }

    #[test]
    fn test_valid_table() {
        let table = IndexTable::new(vec![ct_row("1.2.1"), ct_row("1.2.1")]);
        let result = IndexValidator::new().validate_table(&table);

        assert!(result.is_valid, "{:?}", result.errors);
        assert!(!result.has_warnings());
        assert_eq!(result.get_summary(), "验证完全通过");
    }

    #[test]
    fn test_multiple_patients_is_error() {
        let mut other = ct_row("1.2.2");
        other.patient_id = Some("P2".to_string());
        let table = IndexTable::new(vec![ct_row("1.2.1"), other]);

        let result = IndexValidator::new().validate_table(&table);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("P2")));
    }

    #[test]
    fn test_unknown_modality_and_missing_position_are_warnings() {
        let mut row = ct_row("1.2.1");
        row.slice_location = None;
        let mut odd = ct_row("1.2.2");
        odd.modality = "FOO".into();

        let result = IndexValidator::new().validate_table(&IndexTable::new(vec![row, odd]));
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_opaque_identifiers_are_warnings() {
        let row = ct_row("S1")
            .with_frame_of_reference("F1")
            .with_referenced_series("abc");
        let result = IndexValidator::new().validate_table(&IndexTable::new(vec![row]));

        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.contains("F1")));
        assert!(result.warnings.iter().any(|w| w.contains("abc")));
        assert!(result.warnings.iter().any(|w| w.contains("S1")));
    }

    #[test]
    fn test_empty_series_uid_is_error() {
        let result = IndexValidator::new().validate_table(&IndexTable::new(vec![ct_row(" ")]));
        assert!(result.has_errors());
    }

    #[test]
    fn test_empty_table_is_error() {
        let result = IndexValidator::new().validate_table(&IndexTable::default());
        assert!(!result.is_valid);
    }
}
