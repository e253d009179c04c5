//! Step ordering and runtime traversal.
//!
//! With no edges, steps run in source order. With edges, a topological order
//! over `from -> to` becomes the static order (cycles fall back to source
//! order with a warning). At runtime the traversal follows the executed
//! step's outgoing edges: a matching `success`/`failure` edge first, then an
//! unconditional one, each picked first-in-source-order. When no edge
//! matches, the walk falls through to the next unvisited step in static
//! order that is not itself an edge target, so branches that were not taken
//! stay unreached and end up `skipped`.

use std::collections::{HashMap, HashSet};

use crate::model::{Edge, EdgeCondition, FlowDocument};

/// Computes the static execution order. Returns the order plus any warnings
/// (currently only the cycle fallback).
pub fn static_order(doc: &FlowDocument) -> (Vec<String>, Vec<String>) {
    let ids: Vec<String> = doc.steps.iter().map(|s| s.id.clone()).collect();
    if doc.edges.is_empty() {
        return (ids, Vec::new());
    }

    let mut indegree: HashMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    for edge in &doc.edges {
        if let Some(count) = indegree.get_mut(edge.to.as_str()) {
            *count += 1;
        }
    }

    let mut placed: Vec<String> = Vec::with_capacity(ids.len());
    let mut done: HashSet<&str> = HashSet::new();

    // Kahn's algorithm, kept stable: among ready nodes always take the one
    // earliest in source order.
    while placed.len() < ids.len() {
        let next = ids
            .iter()
            .find(|id| !done.contains(id.as_str()) && indegree[id.as_str()] == 0);
        let Some(next) = next else { break };

        done.insert(next.as_str());
        placed.push(next.clone());
        for edge in &doc.edges {
            if edge.from == *next {
                if let Some(count) = indegree.get_mut(edge.to.as_str()) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    if placed.len() < ids.len() {
        return (
            ids,
            vec!["flow edges contain a cycle, falling back to source order".to_string()],
        );
    }
    (placed, Vec::new())
}

/// Runtime walk over the step graph. The runner asks for the next step id
/// after each completion; ids never repeat.
pub struct Traversal {
    order: Vec<String>,
    edges: Vec<Edge>,
    edge_targets: HashSet<String>,
    visited: HashSet<String>,
}

impl Traversal {
    pub fn new(doc: &FlowDocument) -> (Self, Vec<String>) {
        let (order, warnings) = static_order(doc);
        let edge_targets = doc.edges.iter().map(|e| e.to.clone()).collect();
        (
            Self {
                order,
                edges: doc.edges.clone(),
                edge_targets,
                visited: HashSet::new(),
            },
            warnings,
        )
    }

    /// Picks the next step. `prev` is the step just executed together with
    /// whether it passed; `None` asks for the starting step.
    pub fn advance(&mut self, prev: Option<(&str, bool)>) -> Option<String> {
        let next = match prev {
            None => self.next_unvisited(false),
            Some((from, passed)) => {
                let outgoing: Vec<&Edge> =
                    self.edges.iter().filter(|e| e.from == from).collect();
                let chosen = outgoing
                    .iter()
                    .find(|e| e.on == EdgeCondition::Success && passed)
                    .or_else(|| {
                        outgoing
                            .iter()
                            .find(|e| e.on == EdgeCondition::Failure && !passed)
                    })
                    .or_else(|| outgoing.iter().find(|e| e.on == EdgeCondition::Always));

                match chosen {
                    Some(edge) if !self.visited.contains(&edge.to) => Some(edge.to.clone()),
                    _ => self.next_unvisited(true),
                }
            }
        };

        if let Some(id) = &next {
            self.visited.insert(id.clone());
        }
        next
    }

    /// True when the traversal reached the given step.
    pub fn reached(&self, id: &str) -> bool {
        self.visited.contains(id)
    }

    fn next_unvisited(&self, roots_only: bool) -> Option<String> {
        self.order
            .iter()
            .find(|id| {
                !self.visited.contains(*id)
                    && (!roots_only || !self.edge_targets.contains(*id))
            })
            .cloned()
    }
}
