//! 多目录运行汇总
//!
//! 每个患者目录一条记录：检查描述 → 是否通过，以及关键失败数和处理错误。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rtqa_core::SeriesCollection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// 单个目录的处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorySummary {
    pub directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    /// 检查描述 → 是否通过，保持模板顺序
    #[serde(default)]
    pub checks: Map<String, Value>,
    #[serde(default)]
    pub critical_failures: usize,
    /// 处理失败时的错误信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DirectorySummary {
    /// 从已完成检查的结果文档生成
    pub fn from_collection(directory: impl Into<PathBuf>, collection: &SeriesCollection) -> Self {
        let checks = collection
            .checks
            .iter()
            .flatten()
            .map(|c| (c.description.clone(), Value::Bool(c.passed)))
            .collect();

        Self {
            directory: directory.into(),
            patient_id: Some(collection.patient_id.clone()),
            checks,
            critical_failures: collection.critical_failures(),
            error: None,
        }
    }

    /// 处理失败的目录
    pub fn failed(directory: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self {
            directory: directory.into(),
            patient_id: None,
            checks: Map::new(),
            critical_failures: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn passed_checks(&self) -> usize {
        self.checks.values().filter(|v| v.as_bool() == Some(true)).count()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// 一次运行的汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub directories: Vec<DirectorySummary>,
}

impl RunSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            directories: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: DirectorySummary) {
        self.directories.push(entry);
    }

    /// 结束运行，目录按路径排序
    pub fn finish(&mut self) {
        self.directories.sort_by(|a, b| a.directory.cmp(&b.directory));
        self.finished_at = Some(Utc::now());
    }

    pub fn critical_failures(&self) -> usize {
        self.directories.iter().map(|d| d.critical_failures).sum()
    }

    pub fn failed_directories(&self) -> usize {
        self.directories.iter().filter(|d| d.is_failed()).count()
    }

    /// 进程退出码：0 全部通过，1 存在关键检查失败，2 存在无法处理的目录
    pub fn exit_code(&self) -> i32 {
        if self.failed_directories() > 0 {
            2
        } else if self.critical_failures() > 0 {
            1
        } else {
            0
        }
    }

    /// 写出 JSON 汇总文件
    pub async fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("Failed to serialize run summary")?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write run summary: {}", path.display()))?;

        info!(
            "运行汇总已写入 {}: {} 个目录, {} 个关键失败, {} 个目录处理失败",
            path.display(),
            self.directories.len(),
            self.critical_failures(),
            self.failed_directories()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtqa_core::{CheckResult, SeriesRecord};

    fn checked(patient_id: &str, critical_passed: bool) -> SeriesCollection {
        let mut collection = SeriesCollection::new(patient_id, vec![SeriesRecord::new("1", "CT")]);
        collection.checks = Some(vec![
            CheckResult {
                description: "CT present".to_string(),
                passed: critical_passed,
                output: String::new(),
                critical: true,
            },
            CheckResult {
                description: "One plan".to_string(),
                passed: false,
                output: "Expected eq 1 but found 0".to_string(),
                critical: false,
            },
        ]);
        collection
    }

    #[test]
    fn test_directory_summary_keeps_check_order() {
        let summary = DirectorySummary::from_collection("/data/p1", &checked("P1", false));
        let keys: Vec<_> = summary.checks.keys().cloned().collect();
        assert_eq!(keys, vec!["CT present", "One plan"]);
        assert_eq!(summary.critical_failures, 1);
        assert_eq!(summary.passed_checks(), 0);
    }

    #[test]
    fn test_exit_code() {
        let mut run = RunSummary::new(Uuid::new_v4());
        run.push(DirectorySummary::from_collection("/data/p1", &checked("P1", true)));
        assert_eq!(run.exit_code(), 0);

        run.push(DirectorySummary::from_collection("/data/p2", &checked("P2", false)));
        assert_eq!(run.exit_code(), 1);

        run.push(DirectorySummary::failed("/data/p3", "索引表为空"));
        assert_eq!(run.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_write_sorted_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check_results.json");

        let mut run = RunSummary::new(Uuid::new_v4());
        run.push(DirectorySummary::from_collection("/data/p2", &checked("P2", true)));
        run.push(DirectorySummary::from_collection("/data/p1", &checked("P1", true)));
        run.finish();
        run.write(&path).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let loaded: RunSummary = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded, run);
        assert_eq!(loaded.directories[0].directory, PathBuf::from("/data/p1"));
        assert!(loaded.finished_at.is_some());
    }
}
