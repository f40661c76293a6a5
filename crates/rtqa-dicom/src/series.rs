//! 结果文档构建
//!
//! 将逐文件索引表汇总为每个序列一条记录的 `SeriesCollection`。

use crate::index::{IndexRow, IndexTable};
use rtqa_core::utils::round_to;
use rtqa_core::{Modality, QaError, Result, SeriesCollection, SeriesRecord};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// 序列集合构建器
#[derive(Debug, Clone, Default)]
pub struct SeriesCollectionBuilder {
    /// 需要带入结果文档的附加字段
    meta: Vec<String>,
}

impl SeriesCollectionBuilder {
    pub fn new(meta: Vec<String>) -> Self {
        Self { meta }
    }

    /// 构建结果文档
    ///
    /// 索引表必须只包含一个患者，且每个序列内模态、时间、坐标系和引用一致。
    pub fn build(&self, table: &IndexTable) -> Result<SeriesCollection> {
        let patient_id = Self::single_patient(table)?;

        let mut rows: Vec<&IndexRow> = table.rows().iter().collect();
        let ranks = Self::modality_ranks(&rows);
        rows.sort_by_key(|row| ranks.get(row.modality.as_str()).copied().unwrap_or(usize::MAX));

        let mut groups: Vec<(&str, Vec<&IndexRow>)> = Vec::new();
        for row in rows {
            match groups.iter_mut().find(|(uid, _)| *uid == row.series_uid) {
                Some((_, group)) => group.push(row),
                None => groups.push((row.series_uid.as_str(), vec![row])),
            }
        }

        let mut series = Vec::with_capacity(groups.len());
        for (series_uid, group) in groups {
            series.push(self.build_record(series_uid, &group)?);
        }

        info!("患者 {} 共整理出 {} 个序列", patient_id, series.len());
        Ok(SeriesCollection::new(patient_id, series))
    }

    fn single_patient(table: &IndexTable) -> Result<String> {
        if table.is_empty() {
            return Err(QaError::Index("索引表为空".to_string()));
        }
        if table.rows().iter().any(|r| r.patient_id.is_none()) {
            return Err(QaError::Index("索引表中存在缺少患者ID的行".to_string()));
        }

        match table.patient_ids().as_slice() {
            [single] => Ok(single.to_string()),
            ids => Err(QaError::Index(format!(
                "每个目录只允许一个患者，发现: {}",
                ids.join(", ")
            ))),
        }
    }

    /// 模态排序：CT、MR、PT、RTSTRUCT、RTPLAN、RTDOSE，其余按首次出现顺序排在后面
    fn modality_ranks(rows: &[&IndexRow]) -> HashMap<String, usize> {
        let mut ranks = HashMap::new();
        let mut next_other = Modality::Other(String::new()).display_rank();
        for row in rows {
            let code = row.modality.as_str();
            if ranks.contains_key(code) {
                continue;
            }
            let rank = match &row.modality {
                Modality::Other(_) => {
                    next_other += 1;
                    next_other
                }
                known => known.display_rank(),
            };
            ranks.insert(code.to_string(), rank);
        }
        ranks
    }

    fn build_record(&self, series_uid: &str, group: &[&IndexRow]) -> Result<SeriesRecord> {
        let first = group[0];

        Self::ensure_uniform(series_uid, group, "modality", |r| r.modality.to_string())?;
        Self::ensure_uniform(series_uid, group, "date_time", |r| format!("{:?}", r.date_time))?;
        Self::ensure_uniform(series_uid, group, "frame_of_reference", |r| {
            format!("{:?}", r.frame_of_reference)
        })?;
        Self::ensure_uniform(series_uid, group, "referenced_series", |r| {
            format!("{:?}", r.referenced_series)
        })?;

        let mut record = SeriesRecord::new(series_uid, first.modality.clone());
        record.date_time = first.date_time;
        record.frame_of_reference = first.frame_of_reference.clone();
        record.referenced_series = first.referenced_series.clone();
        record.instance_count = group.len();

        for key in &self.meta {
            let value = first.extra.get(key).cloned().unwrap_or(Value::Null);
            record.meta.insert(key.clone(), value);
        }

        if first.modality.is_image() {
            Self::annotate_slices(&mut record, group);
        }

        match first.modality {
            Modality::RtStruct => {
                record.structure_names = group.iter().find_map(|r| r.structure_names.clone());
                if record.structure_names.is_none() {
                    debug!("序列 {} 未提供结构名称", series_uid);
                }
            }
            Modality::RtDose => {
                record.dose_summation_type =
                    group.iter().find_map(|r| r.dose_summation_type.clone());
            }
            _ => {}
        }

        Ok(record)
    }

    fn ensure_uniform<F>(series_uid: &str, group: &[&IndexRow], field: &str, key: F) -> Result<()>
    where
        F: Fn(&IndexRow) -> String,
    {
        let first = key(group[0]);
        if group.iter().any(|row| key(*row) != first) {
            return Err(QaError::InconsistentSeries {
                series_uid: series_uid.to_string(),
                field: field.to_string(),
            });
        }
        Ok(())
    }

    /// 计算层间距一致性与重复层
    fn annotate_slices(record: &mut SeriesRecord, group: &[&IndexRow]) {
        let mut locations: Vec<f64> = group.iter().filter_map(|r| r.slice_location).collect();
        if locations.is_empty() {
            debug!("图像序列 {} 没有层位置信息", record.series_uid);
            return;
        }
        locations.sort_by(|a, b| a.total_cmp(b));

        let mut spacings: Vec<f64> = locations
            .windows(2)
            .map(|pair| round_to(pair[1] - pair[0], 2))
            .collect();
        spacings.sort_by(|a, b| a.total_cmp(b));
        spacings.dedup();

        let mut unique_locations = locations.clone();
        unique_locations.dedup();
        let duplicated = unique_locations.len() != locations.len();

        let (consistent, spacing) = match spacings.as_slice() {
            [] => (true, Value::Null),
            [single] => (true, Value::from(*single)),
            many => (false, Value::from(many.to_vec())),
        };

        record
            .meta
            .insert("consistent_slice_spacing".to_string(), Value::Bool(consistent));
        record.meta.insert("slice_spacing".to_string(), spacing);
        record
            .meta
            .insert("duplicated_slices".to_string(), Value::Bool(duplicated));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(uid: &str, modality: &str) -> IndexRow {
        IndexRow::new(uid, modality).with_patient("P1")
    }

    fn ct_slices(uid: &str, locations: &[f64]) -> Vec<IndexRow> {
        locations
            .iter()
            .map(|loc| row(uid, "CT").with_frame_of_reference("F1").with_slice_location(*loc))
            .collect()
    }

    #[test]
    fn test_build_orders_by_modality_and_counts_instances() {
        let mut rows = vec![
            row("9", "RTDOSE"),
            row("8", "REG"),
            row("5", "RTSTRUCT").with_referenced_series("1"),
        ];
        rows.extend(ct_slices("1", &[0.0, 2.5, 5.0]));
        let table = IndexTable::new(rows);

        let collection = SeriesCollectionBuilder::default().build(&table).unwrap();
        let order: Vec<_> = collection.series.iter().map(|s| s.series_uid.as_str()).collect();
        assert_eq!(order, vec!["1", "5", "9", "8"]);
        assert_eq!(collection.patient_id, "P1");
        assert_eq!(collection.series[0].instance_count, 3);
        assert_eq!(collection.series[1].referenced_series.as_deref(), Some("1"));
    }

    #[test]
    fn test_slice_spacing_annotations() {
        let table = IndexTable::new(ct_slices("1", &[5.0, 0.0, 2.5]));
        let collection = SeriesCollectionBuilder::default().build(&table).unwrap();
        let ct = &collection.series[0];
        assert_eq!(ct.meta["consistent_slice_spacing"], json!(true));
        assert_eq!(ct.meta["slice_spacing"], json!(2.5));
        assert_eq!(ct.meta["duplicated_slices"], json!(false));

        let table = IndexTable::new(ct_slices("1", &[0.0, 2.5, 2.5, 6.0]));
        let collection = SeriesCollectionBuilder::default().build(&table).unwrap();
        let ct = &collection.series[0];
        assert_eq!(ct.meta["consistent_slice_spacing"], json!(false));
        assert_eq!(ct.meta["slice_spacing"], json!([0.0, 2.5, 3.5]));
        assert_eq!(ct.meta["duplicated_slices"], json!(true));
    }

    #[test]
    fn test_meta_fields_default_to_null() {
        let mut first = row("1", "RTPLAN");
        first.extra.insert("RTPlanLabel".to_string(), json!("HN_70"));
        let table = IndexTable::new(vec![first]);

        let builder =
            SeriesCollectionBuilder::new(vec!["RTPlanLabel".to_string(), "Missing".to_string()]);
        let collection = builder.build(&table).unwrap();
        assert_eq!(collection.series[0].meta["RTPlanLabel"], json!("HN_70"));
        assert_eq!(collection.series[0].meta["Missing"], Value::Null);
    }

    #[test]
    fn test_structure_names_and_dose_type() {
        let mut rtstruct = row("5", "RTSTRUCT");
        rtstruct.structure_names = Some(vec!["GTV".to_string(), "Brainstem".to_string()]);
        let mut dose = row("9", "RTDOSE");
        dose.dose_summation_type = Some("PLAN".to_string());

        let collection = SeriesCollectionBuilder::default()
            .build(&IndexTable::new(vec![dose, rtstruct]))
            .unwrap();
        assert_eq!(
            collection.series[0].structure_names,
            Some(vec!["GTV".to_string(), "Brainstem".to_string()])
        );
        assert_eq!(collection.series[1].dose_summation_type.as_deref(), Some("PLAN"));
    }

    #[test]
    fn test_inconsistent_series_is_fatal() {
        let table = IndexTable::new(vec![
            row("1", "CT").with_frame_of_reference("F1"),
            row("1", "CT").with_frame_of_reference("F2"),
        ]);
        let err = SeriesCollectionBuilder::default().build(&table).unwrap_err();
        assert!(matches!(
            err,
            QaError::InconsistentSeries { ref field, .. } if field == "frame_of_reference"
        ));
    }

    #[test]
    fn test_multiple_patients_is_fatal() {
        let table = IndexTable::new(vec![row("1", "CT"), IndexRow::new("2", "CT").with_patient("P2")]);
        assert!(matches!(
            SeriesCollectionBuilder::default().build(&table),
            Err(QaError::Index(_))
        ));
    }
}
