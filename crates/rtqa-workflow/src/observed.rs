//! 实际序列图
//!
//! 节点是序列UID；边来自序列引用以及共享的参考坐标系。

use crate::graph::DiGraph;
use rtqa_core::{Modality, SeriesCollection};
use rtqa_dicom::IndexTable;
use std::collections::BTreeMap;

/// 实际序列节点属性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedNode {
    pub modality: Modality,
    pub frame_of_reference: Option<String>,
    pub referenced_series: Option<String>,
}

/// 实际序列图
#[derive(Debug, Clone, Default)]
pub struct ObservedGraph {
    graph: DiGraph<ObservedNode>,
}

impl ObservedGraph {
    /// 从逐文件索引表构建，每个序列取第一行作为代表
    pub fn from_index(table: &IndexTable) -> Self {
        let nodes = table
            .group_by_series()
            .into_iter()
            .map(|(uid, rows)| {
                let first = rows[0];
                (
                    uid.to_string(),
                    ObservedNode {
                        modality: first.modality.clone(),
                        frame_of_reference: first.frame_of_reference.clone(),
                        referenced_series: first.referenced_series.clone(),
                    },
                )
            })
            .collect();
        Self::build(nodes)
    }

    /// 从结果文档构建，同一UID出现多次时取第一条
    pub fn from_collection(collection: &SeriesCollection) -> Self {
        let mut nodes: BTreeMap<String, ObservedNode> = BTreeMap::new();
        for series in &collection.series {
            nodes
                .entry(series.series_uid.clone())
                .or_insert_with(|| ObservedNode {
                    modality: series.modality.clone(),
                    frame_of_reference: series.frame_of_reference.clone(),
                    referenced_series: series.referenced_series.clone(),
                });
        }
        Self::build(nodes)
    }

    /// 按UID升序建图
    ///
    /// 每个序列先加引用边（目标存在时），再向同一坐标系内的其余序列按UID升序加边。
    /// 悬空引用直接忽略。
    fn build(nodes: BTreeMap<String, ObservedNode>) -> Self {
        let mut graph = DiGraph::new();
        let mut frame_groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (uid, node) in &nodes {
            if let Some(frame) = &node.frame_of_reference {
                frame_groups.entry(frame.clone()).or_default().push(uid.clone());
            }
            graph.add_node(uid.clone(), node.clone());
        }

        for (uid, node) in &nodes {
            if let Some(target) = &node.referenced_series {
                graph.add_edge(uid, target);
            }

            if let Some(peers) = node
                .frame_of_reference
                .as_ref()
                .and_then(|frame| frame_groups.get(frame))
            {
                for peer in peers.iter().filter(|peer| *peer != uid) {
                    graph.add_edge(uid, peer);
                }
            }
        }

        Self { graph }
    }

    pub fn modality(&self, series_uid: &str) -> Option<&Modality> {
        self.graph.node(series_uid).map(|n| &n.modality)
    }

    /// 出边邻居（只沿出边，不回溯入边）
    pub fn successors(&self, series_uid: &str) -> Vec<&str> {
        self.graph.successors(series_uid)
    }

    /// 按节点顺序列出指定模态的序列
    pub fn series_with_modality(&self, modality: &Modality) -> Vec<&str> {
        self.graph
            .nodes()
            .filter(|(_, node)| &node.modality == modality)
            .map(|(uid, _)| uid)
            .collect()
    }

    pub fn graph(&self) -> &DiGraph<ObservedNode> {
        &self.graph
    }
}
