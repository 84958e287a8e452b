use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user-authored workflow graph. Immutable once submitted for execution;
/// runners hold a read-only reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A unit of computation in the graph. The `config` value is parsed by the
/// executor matching `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Input,
    Template,
    Agent,
    Merge,
    Judge,
    Switch,
    Extract,
    Invoke,
    Foreach,
    State,
    Output,
}

/// A directed dependency between nodes. `source_handle` names a switch
/// output port; edges may be disabled mid-run by routing decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// In-edges of `id` whose source actually exists in the graph.
    pub fn incoming<'g>(&'g self, id: &str) -> impl Iterator<Item = &'g Edge> + 'g {
        let id = id.to_string();
        self.edges
            .iter()
            .filter(move |e| e.target == id && self.has_node(&e.source))
    }

    /// Out-edges of `id` whose target actually exists in the graph.
    pub fn outgoing<'g>(&'g self, id: &str) -> impl Iterator<Item = &'g Edge> + 'g {
        let id = id.to_string();
        self.edges
            .iter()
            .filter(move |e| e.source == id && self.has_node(&e.target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_deserializes_canvas_json() {
        let graph: Graph = serde_json::from_value(json!({
            "id": "g1",
            "nodes": [
                {"id": "a", "type": "input", "config": {"prompt": "hi"}},
                {"id": "b", "type": "agent", "label": "Writer", "config": {"agentId": "main"}},
            ],
            "edges": [
                {"id": "e1", "source": "a", "target": "b"},
                {"id": "e2", "source": "b", "target": "missing", "sourceHandle": "r1"},
            ],
        }))
        .unwrap();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.node("b").unwrap().kind, NodeKind::Agent);
        assert_eq!(graph.incoming("b").count(), 1);
        // Dangling edge targets are filtered out.
        assert_eq!(graph.outgoing("b").count(), 0);
        assert_eq!(graph.edges[1].source_handle.as_deref(), Some("r1"));
    }
}
