//! Structural checks that do not stop a network from loading.

use crate::graph::{NetworkGraph, NodeIndex};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No node has children while being nobody's child.
    NoTopAgent,
    MultipleTopAgents(Vec<String>),
    Unreachable(Vec<String>),
    /// A delegation loop in the static graph, first node repeated at the end.
    StaticCycle(Vec<String>),
    EmptyInstructions(String),
    UnresolvedPlaceholder { node: String, key: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTopAgent => write!(f, "no top agent found"),
            Self::MultipleTopAgents(names) => {
                write!(f, "multiple top agents: {}", names.join(", "))
            }
            Self::Unreachable(names) => {
                write!(f, "unreachable from the front node: {}", names.join(", "))
            }
            Self::StaticCycle(path) => write!(f, "delegation cycle: {}", path.join(" -> ")),
            Self::EmptyInstructions(node) => write!(f, "'{}' has no instructions", node),
            Self::UnresolvedPlaceholder { node, key } => {
                write!(f, "'{}' references undefined fragment {{{}}}", node, key)
            }
        }
    }
}

/// Pick the front node and collect diagnostics.
///
/// A declared front wins. Otherwise the single top agent is used, or the only
/// node of a one-node network.
pub(crate) fn analyze(
    graph: &NetworkGraph,
    declared_front: Option<NodeIndex>,
) -> (Option<NodeIndex>, Vec<Diagnostic>) {
    let mut out = Vec::new();
    let n = graph.len();

    let mut has_parent = vec![false; n];
    for node in graph.nodes() {
        for child in node.child_indices() {
            has_parent[child.as_usize()] = true;
        }
    }
    let tops: Vec<NodeIndex> = graph
        .nodes()
        .filter(|node| !node.is_leaf() && !has_parent[node.index().as_usize()])
        .map(|node| node.index())
        .collect();

    let front = match declared_front {
        Some(idx) => Some(idx),
        None => match tops.as_slice() {
            [single] => Some(*single),
            [] => {
                if n == 1 {
                    graph.nodes().next().map(|node| node.index())
                } else {
                    out.push(Diagnostic::NoTopAgent);
                    None
                }
            }
            many => {
                out.push(Diagnostic::MultipleTopAgents(names(graph, many)));
                None
            }
        },
    };

    if let Some(front) = front {
        let reachable = reachable_from(graph, front);
        let missing: Vec<NodeIndex> = graph
            .nodes()
            .map(|node| node.index())
            .filter(|idx| !reachable[idx.as_usize()])
            .collect();
        if !missing.is_empty() {
            out.push(Diagnostic::Unreachable(names(graph, &missing)));
        }
    }

    for cycle in find_cycles(graph) {
        out.push(Diagnostic::StaticCycle(names(graph, &cycle)));
    }

    for node in graph.nodes() {
        if node.instructions().trim().is_empty() {
            out.push(Diagnostic::EmptyInstructions(node.name().to_string()));
        }
    }

    (front, out)
}

fn names(graph: &NetworkGraph, indices: &[NodeIndex]) -> Vec<String> {
    indices
        .iter()
        .map(|idx| graph.node(*idx).name().to_string())
        .collect()
}

fn reachable_from(graph: &NetworkGraph, start: NodeIndex) -> Vec<bool> {
    let mut seen = vec![false; graph.len()];
    let mut stack = vec![start];
    while let Some(idx) = stack.pop() {
        if std::mem::replace(&mut seen[idx.as_usize()], true) {
            continue;
        }
        stack.extend(graph.node(idx).child_indices().iter().copied());
    }
    seen
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// One representative loop per back edge found by a depth-first walk.
fn find_cycles(graph: &NetworkGraph) -> Vec<Vec<NodeIndex>> {
    let mut marks = vec![Mark::Unvisited; graph.len()];
    let mut path = Vec::new();
    let mut cycles = Vec::new();
    for node in graph.nodes() {
        if marks[node.index().as_usize()] == Mark::Unvisited {
            visit(graph, node.index(), &mut marks, &mut path, &mut cycles);
        }
    }
    cycles
}

fn visit(
    graph: &NetworkGraph,
    idx: NodeIndex,
    marks: &mut [Mark],
    path: &mut Vec<NodeIndex>,
    cycles: &mut Vec<Vec<NodeIndex>>,
) {
    marks[idx.as_usize()] = Mark::OnPath;
    path.push(idx);
    for &child in graph.node(idx).child_indices() {
        match marks[child.as_usize()] {
            Mark::Unvisited => visit(graph, child, marks, path, cycles),
            Mark::OnPath => {
                if let Some(start) = path.iter().position(|p| *p == child) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(child);
                    cycles.push(cycle);
                }
            }
            Mark::Done => {}
        }
    }
    path.pop();
    marks[idx.as_usize()] = Mark::Done;
}
