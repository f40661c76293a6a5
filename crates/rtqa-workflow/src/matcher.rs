//! 序列对应匹配
//!
//! 将实际序列对应到模板中的期望节点。对每个连通分量按拓扑顺序访问期望节点：
//! 候选序列沿出边寻找模态与期望邻居一致的实际邻居，命中时同时记录两端。
//!
//! 已知限制（为兼容现有模板而保留）：
//! - 只沿实际序列图的出边查找，仅被引用的一方不会反向找到引用者；
//! - 匹配列表不去重，同一序列可能在同一标签下出现多次；
//! - 没有出边的期望节点只能作为其他节点的期望邻居被匹配，单节点分量永远不会命中。

use crate::expected::TemplateGraph;
use crate::observed::ObservedGraph;
use rtqa_core::{RunReporter, SeriesCollection};

const MODULE: &str = "match";

/// 匹配结果：标签 → 序列UID列表，标签按首次出现的顺序排列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchAssignments {
    entries: Vec<(String, Vec<String>)>,
}

impl MatchAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// 确保标签存在，返回其列表
    fn entry(&mut self, label: &str) -> &mut Vec<String> {
        let position = match self.entries.iter().position(|(l, _)| l == label) {
            Some(position) => position,
            None => {
                self.entries.push((label.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[position].1
    }

    fn push(&mut self, label: &str, series_uid: &str) {
        self.entry(label).push(series_uid.to_string());
    }

    pub fn get(&self, label: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, uids)| uids.as_slice())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(l, uids)| (l.as_str(), uids.as_slice()))
    }

    /// 没有任何序列被匹配
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, uids)| uids.is_empty())
    }

    /// 将标签写回结果文档，返回写入次数
    ///
    /// 按标签顺序、再按列表顺序写入，同一序列命中多个标签时后写入者生效。
    /// 未被本次匹配到的序列保留原有标签。
    pub fn apply_to(&self, collection: &mut SeriesCollection) -> usize {
        let mut written = 0;
        for (label, uids) in &self.entries {
            for uid in uids {
                written += collection.assign_match(uid, label);
            }
        }
        written
    }
}

/// 对应匹配器
pub struct CorrespondenceMatcher<'a> {
    template: &'a TemplateGraph,
    observed: &'a ObservedGraph,
}

impl<'a> CorrespondenceMatcher<'a> {
    pub fn new(template: &'a TemplateGraph, observed: &'a ObservedGraph) -> Self {
        Self { template, observed }
    }

    /// 执行匹配；匹配失败不是错误，只体现为空列表
    pub fn run(&self, reporter: &dyn RunReporter) -> MatchAssignments {
        let mut matches = MatchAssignments::new();

        for component in self.template.components() {
            for expected in component {
                self.visit(expected, &mut matches);
            }
        }

        for (label, uids) in matches.iter() {
            reporter.info(MODULE, format!("Match for {}: {:?}", label, uids));
        }

        matches
    }

    fn visit(&self, expected: &str, matches: &mut MatchAssignments) {
        let Some(modality) = self.template.modality(expected) else {
            return;
        };

        let candidates: Vec<String> = {
            let existing = matches.entry(expected);
            if existing.is_empty() {
                self.observed
                    .series_with_modality(modality)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            } else {
                existing.clone()
            }
        };

        let expected_neighbours = self.template.successors(expected);

        for series_uid in &candidates {
            for neighbour in self.observed.successors(series_uid) {
                let Some(neighbour_modality) = self.observed.modality(neighbour) else {
                    continue;
                };
                for expected_neighbour in &expected_neighbours {
                    if self.template.modality(expected_neighbour) == Some(neighbour_modality) {
                        matches.push(expected, series_uid);
                        matches.push(expected_neighbour, neighbour);
                    }
                }
            }
        }
    }
}
