use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::models::{Component, DetectedComponent};

use super::file_graph::SealedFileGraph;
use super::merge_development;

/// One merged node. Edges are stored as id sets on both ends so that cyclic
/// manifests never produce reference cycles.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub component: Component,
    pub explicit: bool,
    pub development: Option<bool>,
    pub parents: BTreeSet<String>,
    pub children: BTreeSet<String>,
    pub locations: BTreeSet<String>,
}

/// The scan-wide graph: nodes keyed by normalized id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, GraphNode>,
    skipped: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union a sealed file graph into this one.
    ///
    /// Commutative, associative and idempotent: explicit flags are OR-ed,
    /// development flags AND-ed, and on an id clash the greater component
    /// (the one carrying more auxiliary data) is kept.
    pub fn merge(&mut self, file: &SealedFileGraph) {
        for (id, incoming) in &file.nodes {
            match self.nodes.entry(id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(GraphNode {
                        component: incoming.component.clone(),
                        explicit: incoming.explicit,
                        development: incoming.development,
                        parents: BTreeSet::new(),
                        children: BTreeSet::new(),
                        locations: BTreeSet::from([file.location.clone()]),
                    });
                }
                Entry::Occupied(mut slot) => {
                    let node = slot.get_mut();
                    node.explicit |= incoming.explicit;
                    node.development = merge_development(node.development, incoming.development);
                    if incoming.component > node.component {
                        node.component = incoming.component.clone();
                    }
                    node.locations.insert(file.location.clone());
                }
            }
        }

        // Sealing guarantees both ends of every edge are in `file.nodes`.
        for (parent, child) in &file.edges {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.children.insert(child.clone());
            }
            if let Some(node) = self.nodes.get_mut(child) {
                node.parents.insert(parent.clone());
            }
        }

        self.skipped.extend(file.skipped.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, component_id: &str) -> Option<&GraphNode> {
        self.nodes.get(component_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &GraphNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.children.len()).sum()
    }

    pub fn skipped_components(&self) -> impl Iterator<Item = &str> {
        self.skipped.iter().map(String::as_str)
    }

    pub fn detected_components(&self) -> Vec<DetectedComponent> {
        self.nodes
            .iter()
            .map(|(id, node)| DetectedComponent {
                id: id.clone(),
                component: node.component.clone(),
                explicit: node.explicit,
                development: node.development,
                parent_ids: node.parents.iter().cloned().collect(),
                locations: node.locations.iter().cloned().collect(),
                license: None,
            })
            .collect()
    }

    /// Explicitly referenced components reachable by walking parent edges up
    /// from `component_id`, the start node included. Breadth-first order.
    pub fn explicit_references(&self, component_id: &str) -> Vec<String> {
        let mut found = Vec::new();
        self.walk_up(component_id, |id, node, _| {
            if node.explicit {
                found.push(id.to_string());
            }
        });
        found
    }

    /// All ancestors of `component_id`, nearest first.
    pub fn ancestors(&self, component_id: &str) -> Vec<String> {
        let mut found = Vec::new();
        self.walk_up(component_id, |id, _, depth| {
            if depth > 0 {
                found.push(id.to_string());
            }
        });
        found
    }

    /// Explicit components nothing else depends on.
    pub fn roots(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.explicit && node.parents.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Breadth-first over parent edges; `visit` sees each reachable node once
    /// with its distance from the start.
    fn walk_up<'a>(&'a self, start: &str, mut visit: impl FnMut(&'a str, &'a GraphNode, usize)) {
        let Some((start, _)) = self.nodes.get_key_value(start) else {
            return;
        };

        let mut visited: HashSet<&str> = HashSet::from([start.as_str()]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start.as_str(), 0)]);

        while let Some((id, depth)) = queue.pop_front() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            visit(id, node, depth);
            for parent in &node.parents {
                if visited.insert(parent.as_str()) {
                    queue.push_back((parent.as_str(), depth + 1));
                }
            }
        }
    }
}

/// Owner of the global graph. `merge_file_graph` is the only mutation path
/// and runs under one lock; per-file builders never touch it.
#[derive(Debug, Default)]
pub struct GraphAggregator {
    graph: Mutex<DependencyGraph>,
}

impl GraphAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DependencyGraph> {
        // A panic mid-merge cannot leave a half-applied union visible to
        // anything but later merges, which are unions themselves.
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn merge_file_graph(&self, graph: &SealedFileGraph) {
        let mut global = self.lock();
        global.merge(graph);
        debug!(
            location = %graph.location(),
            file_nodes = graph.len(),
            total_nodes = global.len(),
            "merged file graph"
        );
    }

    pub fn detected_components(&self) -> Vec<DetectedComponent> {
        self.lock().detected_components()
    }

    /// True iff at least one explicitly referenced component above
    /// `component_id` (or the component itself) satisfies `predicate`.
    /// Unknown ids have no explicit references.
    pub fn assert_all_explicitly_referenced_components<F>(&self, component_id: &str, predicate: F) -> bool
    where
        F: Fn(&Component) -> bool,
    {
        let graph = self.lock();
        graph
            .explicit_references(component_id)
            .iter()
            .filter_map(|id| graph.node(id))
            .any(|node| predicate(&node.component))
    }

    pub fn explicit_references(&self, component_id: &str) -> Vec<String> {
        self.lock().explicit_references(component_id)
    }

    pub fn ancestors(&self, component_id: &str) -> Vec<String> {
        self.lock().ancestors(component_id)
    }

    pub fn roots(&self) -> Vec<String> {
        self.lock().roots()
    }

    pub fn component(&self, component_id: &str) -> Option<Component> {
        self.lock().node(component_id).map(|n| n.component.clone())
    }

    pub fn skipped_components(&self) -> Vec<String> {
        self.lock().skipped_components().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> DependencyGraph {
        self.lock().clone()
    }

    pub fn into_graph(self) -> DependencyGraph {
        self.graph.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
