use std::collections::{HashSet, VecDeque};

use clawdini_core::graph::Graph;

/// Derive the sub-graph spanned by the strict successors of `root`: the
/// transitive targets of its out-edges and the edges between them. The root
/// itself is excluded, and edges are kept only when both endpoints made it
/// into the successor set, so shared upstreams are not replicated.
pub fn successor_subgraph(graph: &Graph, root: &str) -> Graph {
    let mut keep: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = graph
        .edges
        .iter()
        .filter(|e| e.source == root && graph.has_node(&e.target))
        .map(|e| e.target.as_str())
        .collect();

    while let Some(id) = queue.pop_front() {
        if !keep.insert(id.to_string()) {
            continue;
        }
        for edge in graph.edges.iter().filter(|e| e.source == id) {
            if graph.has_node(&edge.target) {
                queue.push_back(&edge.target);
            }
        }
    }

    Graph {
        id: format!("{}:{}", graph.id, root),
        nodes: graph
            .nodes
            .iter()
            .filter(|n| keep.contains(&n.id))
            .cloned()
            .collect(),
        edges: graph
            .edges
            .iter()
            .filter(|e| keep.contains(&e.source) && keep.contains(&e.target))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawdini_core::graph::{Edge, GraphNode, NodeKind};
    use serde_json::Value;

    fn node(id: &str) -> GraphNode {
        GraphNode {
            id: id.into(),
            kind: NodeKind::Output,
            label: None,
            config: Value::Null,
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
        }
    }

    #[test]
    fn test_strict_successors_only() {
        // upstream -> fanout -> a -> b, with an unrelated side node.
        let graph = Graph {
            id: "g".into(),
            nodes: vec![node("upstream"), node("fanout"), node("a"), node("b"), node("side")],
            edges: vec![
                edge("e1", "upstream", "fanout"),
                edge("e2", "fanout", "a"),
                edge("e3", "a", "b"),
            ],
        };

        let sub = successor_subgraph(&graph, "fanout");
        let mut ids: Vec<&str> = sub.nodes.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
        // The fanout node itself and its upstream are excluded, as is the
        // edge that crossed the boundary.
        assert_eq!(sub.edges.len(), 1);
        assert_eq!(sub.edges[0].id, "e3");
    }

    #[test]
    fn test_shared_upstream_edge_filtered() {
        // fanout -> a, upstream -> a: the upstream edge has one endpoint
        // outside the successor set and must not survive.
        let graph = Graph {
            id: "g".into(),
            nodes: vec![node("fanout"), node("upstream"), node("a")],
            edges: vec![edge("e1", "fanout", "a"), edge("e2", "upstream", "a")],
        };
        let sub = successor_subgraph(&graph, "fanout");
        assert_eq!(sub.nodes.len(), 1);
        assert!(sub.edges.is_empty());
    }
}
