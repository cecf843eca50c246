//! Registration-time graph validation (§4.2's invariants), run once at
//! `compile()` so that structural mistakes fail fast instead of manifesting
//! as a `GraphRoutingError` mid-request.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};

use super::builder::{EdgeTarget, GraphBuilder};

/// A non-fatal observation surfaced alongside a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// Node the warning concerns.
    pub node: String,
    /// Human-readable description.
    pub message: String,
}

/// The result of validating a [`GraphBuilder`] before compilation.
#[derive(Debug, Clone, Default)]
pub struct GraphValidationResult {
    /// Non-fatal observations (e.g. an unreachable conditional branch that
    /// happens to share a label with a reachable one).
    pub warnings: Vec<ValidationWarning>,
}

/// Validate `builder` against every structural invariant in §4.2:
///
/// - exactly one entry point, with in-degree 0 for that node considered as
///   the root of traversal;
/// - at least one terminal node (out-degree 0);
/// - every non-terminal node has at least one outgoing edge;
/// - every conditional edge's predicate's declared labels are fully mapped;
/// - every node is reachable from the entry point;
/// - every node can reach some terminal node;
/// - the graph is acyclic.
pub fn validate(builder: &GraphBuilder) -> Result<GraphValidationResult> {
    let entry = builder
        .entry_point
        .as_ref()
        .ok_or_else(|| Error::InvalidGraph("no entry point set".to_string()))?;
    if !builder.nodes.contains_key(entry) {
        return Err(Error::InvalidGraph(format!(
            "entry point '{entry}' is not a registered node"
        )));
    }

    let terminals: Vec<&String> = builder
        .nodes
        .keys()
        .filter(|n| is_terminal(builder, n))
        .collect();
    if terminals.is_empty() {
        return Err(Error::InvalidGraph(
            "graph has no terminal node (every node has outgoing edges)".to_string(),
        ));
    }

    for (node, edges) in &builder.edges {
        if edges.is_empty() && !terminals.contains(&node) {
            return Err(Error::InvalidGraph(format!(
                "node '{node}' has an edge list but resolves to zero edges"
            )));
        }
        for edge in edges {
            if let EdgeTarget::Node(target) = &edge.target {
                if !builder.nodes.contains_key(target) {
                    return Err(Error::InvalidGraph(format!(
                        "node '{node}' has an edge to unregistered node '{target}'"
                    )));
                }
            }
        }
        if let Some(labels) = &edges.first().and_then(|e| e.conditional_labels.clone()) {
            let mapped: HashSet<&String> = edges.iter().filter_map(|e| e.label.as_ref()).collect();
            for label in labels {
                if !mapped.contains(label) {
                    return Err(Error::InvalidGraph(format!(
                        "node '{node}' conditional predicate can return label '{label}' with no matching edge"
                    )));
                }
            }
        }
    }

    let reachable = reachable_from(builder, entry);
    for name in builder.nodes.keys() {
        if !reachable.contains(name) {
            return Err(Error::InvalidGraph(format!(
                "node '{name}' is unreachable from entry point '{entry}'"
            )));
        }
    }

    let terminal_set: HashSet<String> = terminals.iter().map(|s| s.to_string()).collect();
    for name in builder.nodes.keys() {
        if !can_reach_terminal(builder, name, &terminal_set) {
            return Err(Error::InvalidGraph(format!(
                "node '{name}' has no path to any terminal node"
            )));
        }
    }

    if let Some(cycle) = find_cycle(builder, entry) {
        return Err(Error::InvalidGraph(format!(
            "graph contains a cycle: {}",
            cycle.join(" -> ")
        )));
    }

    let mut warnings = Vec::new();
    if builder.error_handler.is_none() {
        warnings.push(ValidationWarning {
            node: builder.entry_point.clone().unwrap_or_default(),
            message: "no error_handler configured: unhandled node errors will terminate the request".into(),
        });
    }

    Ok(GraphValidationResult { warnings })
}

/// A node is terminal when it has no outgoing edges, or when every one of
/// its outgoing edges targets [`EdgeTarget::End`] (the shape
/// `GraphBuilder::add_edge_to_end` produces).
fn is_terminal(builder: &GraphBuilder, node: &str) -> bool {
    builder
        .edges
        .get(node)
        .map_or(true, |edges| edges.iter().all(|e| matches!(e.target, EdgeTarget::End)))
}

fn reachable_from(builder: &GraphBuilder, entry: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(entry.to_string());
    seen.insert(entry.to_string());
    while let Some(node) = queue.pop_front() {
        if let Some(edges) = builder.edges.get(&node) {
            for edge in edges {
                if let EdgeTarget::Node(next) = &edge.target {
                    if seen.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
        }
    }
    seen
}

fn can_reach_terminal(builder: &GraphBuilder, start: &str, terminals: &HashSet<String>) -> bool {
    if terminals.contains(start) {
        return true;
    }
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start.to_string());
    seen.insert(start.to_string());
    while let Some(node) = queue.pop_front() {
        if terminals.contains(&node) {
            return true;
        }
        if let Some(edges) = builder.edges.get(&node) {
            for edge in edges {
                match &edge.target {
                    EdgeTarget::End => return true,
                    EdgeTarget::Node(next) => {
                        if seen.insert(next.clone()) {
                            queue.push_back(next.clone());
                        }
                    }
                }
            }
        }
    }
    false
}

/// DFS cycle detection returning the offending path, if any.
fn find_cycle(builder: &GraphBuilder, entry: &str) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: &str,
        builder: &GraphBuilder,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node.to_string(), Mark::Visiting);
        stack.push(node.to_string());
        if let Some(edges) = builder.edges.get(node) {
            for edge in edges {
                if let EdgeTarget::Node(next) = &edge.target {
                    if let Some(cycle) = visit(next, builder, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        marks.insert(node.to_string(), Mark::Done);
        None
    }

    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut stack = Vec::new();
    visit(entry, builder, &mut marks, &mut stack)
}
