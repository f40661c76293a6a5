//! 有向图
//!
//! 节点以字符串为键并携带属性，邻接表保持边的插入顺序，
//! 匹配结果的确定性依赖这一顺序。

use rtqa_core::{QaError, Result};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// 带节点属性的有向图
#[derive(Debug, Clone)]
pub struct DiGraph<N> {
    keys: Vec<String>,
    attrs: Vec<N>,
    index: HashMap<String, usize>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

impl<N> Default for DiGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> DiGraph<N> {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            attrs: Vec::new(),
            index: HashMap::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
        }
    }

    /// 添加节点；键已存在时只更新属性，位置不变
    pub fn add_node(&mut self, key: impl Into<String>, attrs: N) -> usize {
        let key = key.into();
        if let Some(&idx) = self.index.get(&key) {
            self.attrs[idx] = attrs;
            return idx;
        }

        let idx = self.keys.len();
        self.index.insert(key.clone(), idx);
        self.keys.push(key);
        self.attrs.push(attrs);
        self.successors.push(Vec::new());
        self.predecessors.push(Vec::new());
        idx
    }

    /// 添加边；任一端点不存在或边已存在时返回 false
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        let (Some(&u), Some(&v)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if self.successors[u].contains(&v) {
            return false;
        }
        self.successors[u].push(v);
        self.predecessors[v].push(u);
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn node(&self, key: &str) -> Option<&N> {
        self.index.get(key).map(|&idx| &self.attrs[idx])
    }

    /// 按插入顺序遍历节点
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &N)> {
        self.keys.iter().map(String::as_str).zip(self.attrs.iter())
    }

    /// 出边邻居，按边的插入顺序
    pub fn successors(&self, key: &str) -> Vec<&str> {
        self.index
            .get(key)
            .map(|&idx| {
                self.successors[idx]
                    .iter()
                    .map(|&s| self.keys[s].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&u), Some(&v)) => self.successors[u].contains(&v),
            _ => false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.keys.len()
    }

    pub fn edge_count(&self) -> usize {
        self.successors.iter().map(Vec::len).sum()
    }

    /// 弱连通分量（忽略边方向）
    ///
    /// 分量按其首个节点的插入顺序输出，分量内节点也按插入顺序排列。
    pub fn connected_components(&self) -> Vec<Vec<String>> {
        let mut seen = vec![false; self.keys.len()];
        let mut components = Vec::new();

        for start in 0..self.keys.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut members = vec![start];
            let mut queue = VecDeque::from([start]);

            while let Some(current) = queue.pop_front() {
                let neighbours = self.successors[current]
                    .iter()
                    .chain(self.predecessors[current].iter());
                for &next in neighbours {
                    if !seen[next] {
                        seen[next] = true;
                        members.push(next);
                        queue.push_back(next);
                    }
                }
            }

            members.sort_unstable();
            components.push(members.into_iter().map(|i| self.keys[i].clone()).collect());
        }

        components
    }

    /// 给定节点子集上的拓扑排序（Kahn算法）
    ///
    /// 边 u→v 保证 u 排在 v 之前；同时就绪的节点按插入顺序输出。存在环时报错。
    pub fn topological_order(&self, subset: &[String]) -> Result<Vec<String>> {
        let members: BTreeSet<usize> = subset
            .iter()
            .filter_map(|key| self.index.get(key).copied())
            .collect();

        let mut in_degree: HashMap<usize, usize> = members
            .iter()
            .map(|&v| {
                let degree = self.predecessors[v]
                    .iter()
                    .filter(|u| members.contains(*u))
                    .count();
                (v, degree)
            })
            .collect();

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&v, _)| v)
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(current) = ready.pop_first() {
            order.push(self.keys[current].clone());
            for next in &self.successors[current] {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*next);
                    }
                }
            }
        }

        if order.len() != members.len() {
            let blocked: Vec<&str> = in_degree
                .iter()
                .filter(|&(_, &degree)| degree > 0)
                .map(|(&v, _)| self.keys[v].as_str())
                .collect();
            return Err(QaError::Template(format!(
                "期望序列之间存在循环引用: {}",
                blocked.join(", ")
            )));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> DiGraph<()> {
        let mut g = DiGraph::new();
        for n in nodes {
            g.add_node(*n, ());
        }
        for (u, v) in edges {
            g.add_edge(u, v);
        }
        g
    }

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_edges_keep_insertion_order_and_ignore_duplicates() {
        let mut g = graph(&["a", "b", "c"], &[("a", "c"), ("a", "b")]);
        assert!(!g.add_edge("a", "c"));
        assert!(!g.add_edge("a", "missing"));

        assert_eq!(g.successors("a"), vec!["c", "b"]);
        assert!(g.successors("b").is_empty());
        assert!(g.successors("missing").is_empty());
        assert_eq!(g.edge_count(), 2);
        assert!(g.has_edge("a", "b"));
        assert!(!g.has_edge("b", "a"));
    }

    #[test]
    fn test_re_adding_node_updates_attributes_only() {
        let mut g: DiGraph<u32> = DiGraph::new();
        g.add_node("a", 1);
        g.add_node("b", 2);
        g.add_node("a", 3);

        assert_eq!(g.node_count(), 2);
        assert_eq!(g.node("a"), Some(&3));
        let order: Vec<_> = g.nodes().map(|(k, _)| k).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_connected_components_ignore_direction() {
        let g = graph(
            &["ct", "struct", "mr", "plan", "pet"],
            &[("struct", "ct"), ("plan", "struct"), ("pet", "mr")],
        );

        let components = g.connected_components();
        assert_eq!(
            components,
            vec![keys(&["ct", "struct", "plan"]), keys(&["mr", "pet"])]
        );
    }

    #[test]
    fn test_topological_order_follows_edges() {
        let g = graph(
            &["ct", "struct", "plan", "dose"],
            &[("dose", "plan"), ("plan", "struct"), ("struct", "ct")],
        );

        let order = g.topological_order(&keys(&["ct", "struct", "plan", "dose"])).unwrap();
        assert_eq!(order, keys(&["dose", "plan", "struct", "ct"]));
    }

    #[test]
    fn test_topological_ties_use_insertion_order() {
        let g = graph(&["x", "y", "z"], &[("z", "x")]);
        let order = g.topological_order(&keys(&["x", "y", "z"])).unwrap();
        assert_eq!(order, keys(&["y", "z", "x"]));
    }

    #[test]
    fn test_topological_order_rejects_cycles() {
        let g = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        assert!(g.topological_order(&keys(&["a", "b"])).is_err());
    }
}
