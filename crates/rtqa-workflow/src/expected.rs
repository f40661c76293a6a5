//! 模板期望序列图
//!
//! 边方向为 期望序列 → 其 `referencedSeries`。

use crate::graph::DiGraph;
use rtqa_core::{Modality, Result, Template};

/// 模板图，构建时即完成分量划分和拓扑排序
#[derive(Debug, Clone, Default)]
pub struct TemplateGraph {
    graph: DiGraph<Modality>,
    /// 每个连通分量内按拓扑顺序排列的节点名
    components: Vec<Vec<String>>,
}

impl TemplateGraph {
    /// 从模板构建；引用未定义节点或存在循环引用时报错
    pub fn build(template: &Template) -> Result<Self> {
        template.validate()?;

        let mut graph = DiGraph::new();
        for expected in &template.expected_series {
            graph.add_node(expected.name.clone(), expected.modality.clone());
        }
        for expected in &template.expected_series {
            if let Some(target) = &expected.referenced_series {
                graph.add_edge(&expected.name, target);
            }
        }

        let components = graph
            .connected_components()
            .iter()
            .map(|members| graph.topological_order(members))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "模板图: {} 个节点, {} 条边, {} 个连通分量",
            graph.node_count(),
            graph.edge_count(),
            components.len()
        );

        Ok(Self { graph, components })
    }

    /// 连通分量，每个分量内为访问顺序
    pub fn components(&self) -> &[Vec<String>] {
        &self.components
    }

    pub fn modality(&self, name: &str) -> Option<&Modality> {
        self.graph.node(name)
    }

    pub fn successors(&self, name: &str) -> Vec<&str> {
        self.graph.successors(name)
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}
