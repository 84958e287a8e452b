use std::collections::{HashMap, HashSet};

use clawdini_core::error::{ClawdiniError, Result};
use clawdini_core::graph::Graph;

/// Peel the graph into execution levels by Kahn's algorithm: level 0 holds
/// the nodes with no in-edges, each later level the nodes unlocked by the
/// one before. Edges referencing nonexistent nodes are ignored. Any node
/// left unplaced means a cycle, which is fatal.
pub fn compute_levels(graph: &Graph) -> Result<Vec<Vec<String>>> {
    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        if !ids.contains(edge.source.as_str()) || !ids.contains(edge.target.as_str()) {
            continue;
        }
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
        *in_degree.get_mut(edge.target.as_str()).unwrap() += 1;
    }

    let mut current: Vec<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut levels = Vec::new();
    let mut placed = 0;
    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for id in &current {
            if let Some(successors) = adjacency.get(id) {
                for succ in successors {
                    let degree = in_degree.get_mut(succ).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*succ);
                    }
                }
            }
        }
        levels.push(current.iter().map(|id| id.to_string()).collect());
        current = next;
    }

    if placed != graph.nodes.len() {
        return Err(ClawdiniError::Graph("cycle detected in graph".into()));
    }
    Ok(levels)
}
