use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::GraphError;
use crate::models::Component;

use super::merge_development;

/// Options for a single usage registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage<'a> {
    /// Declared directly by the manifest under analysis.
    pub explicit: bool,
    /// Id of the component that pulled this one in.
    pub parent: Option<&'a str>,
    /// Development/test-only dependency, when the manifest says.
    pub development: Option<bool>,
}

#[derive(Debug, Clone)]
pub(crate) struct FileNode {
    pub(crate) component: Component,
    pub(crate) explicit: bool,
    pub(crate) development: Option<bool>,
}

/// Usages recorded while parsing one file. Nothing here is shared; the owning
/// analyzer is the only writer until [`FileGraph::seal`].
#[derive(Debug, Clone)]
pub struct FileGraph {
    location: String,
    nodes: BTreeMap<String, FileNode>,
    /// `(parent, child)` pairs; duplicates are collapsed when sealing.
    edges: Vec<(String, String)>,
    skipped: BTreeSet<String>,
}

impl FileGraph {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            skipped: BTreeSet::new(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Record one observation of `component` and return its id.
    ///
    /// The parent does not need to exist yet; dangling parents are reported
    /// by [`FileGraph::seal`].
    pub fn register_usage(
        &mut self,
        component: Component,
        is_explicit: bool,
        parent_id: Option<&str>,
    ) -> String {
        self.register_usage_with(
            component,
            Usage {
                explicit: is_explicit,
                parent: parent_id,
                development: None,
            },
        )
    }

    pub fn register_usage_with(&mut self, component: Component, usage: Usage<'_>) -> String {
        let id = component.id();

        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.explicit |= usage.explicit;
                node.development = merge_development(node.development, usage.development);
                if component > node.component {
                    node.component = component;
                }
            }
            None => {
                self.nodes.insert(
                    id.clone(),
                    FileNode {
                        component,
                        explicit: usage.explicit,
                        development: usage.development,
                    },
                );
            }
        }

        if let Some(parent) = usage.parent {
            self.edges.push((parent.to_string(), id.clone()));
        }

        id
    }

    /// Remember an entry the analyzer saw but could not turn into a component.
    pub fn register_parse_failure(&mut self, entry: impl Into<String>) {
        self.skipped.insert(entry.into());
    }

    pub fn contains(&self, component_id: &str) -> bool {
        self.nodes.contains_key(component_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finish building. Every edge must point from a parent registered in
    /// this same file.
    pub fn seal(self) -> Result<SealedFileGraph, GraphError> {
        let mut edges = BTreeSet::new();
        for (parent, child) in self.edges {
            if !self.nodes.contains_key(&parent) {
                return Err(GraphError::UnknownParentReference {
                    location: self.location,
                    parent_id: parent,
                    child_id: child,
                });
            }
            edges.insert((parent, child));
        }

        debug!(
            location = %self.location,
            nodes = self.nodes.len(),
            edges = edges.len(),
            "sealed file graph"
        );

        Ok(SealedFileGraph {
            location: self.location,
            nodes: self.nodes,
            edges,
            skipped: self.skipped,
        })
    }
}

/// A file graph that passed validation and can be merged.
#[derive(Debug, Clone)]
pub struct SealedFileGraph {
    pub(crate) location: String,
    pub(crate) nodes: BTreeMap<String, FileNode>,
    pub(crate) edges: BTreeSet<(String, String)>,
    pub(crate) skipped: BTreeSet<String>,
}

impl SealedFileGraph {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn component_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn is_explicit(&self, component_id: &str) -> Option<bool> {
        self.nodes.get(component_id).map(|n| n.explicit)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pip(name: &str, version: &str) -> Component {
        Component::pip(name, version).unwrap()
    }

    #[test]
    fn test_explicit_flag_is_upgraded_not_downgraded() {
        let mut graph = FileGraph::new("requirements.txt");
        let id = graph.register_usage(pip("six", "1.16.0"), false, None);
        graph.register_usage(pip("six", "1.16.0"), true, None);
        graph.register_usage(pip("six", "1.16.0"), false, None);

        let sealed = graph.seal().unwrap();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed.is_explicit(&id), Some(true));
    }

    #[test]
    fn test_parent_registered_later_in_same_file() {
        let mut graph = FileGraph::new("Cargo.lock");
        let parent = Component::cargo("tokio", "1.38.0", None).unwrap();
        let child = Component::cargo("mio", "0.8.11", None).unwrap();

        graph.register_usage(child, false, Some(&parent.id()));
        graph.register_usage(parent, true, None);

        let sealed = graph.seal().unwrap();
        assert_eq!(sealed.edges().count(), 1);
    }

    #[test]
    fn test_unknown_parent_fails_at_seal() {
        let mut graph = FileGraph::new("package-lock.json");
        graph.register_usage(Component::npm("ms", "2.1.3").unwrap(), false, Some("debug 4.3.4 - Npm"));

        let err = graph.seal().unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownParentReference {
                location: "package-lock.json".to_string(),
                parent_id: "debug 4.3.4 - Npm".to_string(),
                child_id: "ms 2.1.3 - Npm".to_string(),
            }
        );
    }

    #[test]
    fn test_multiple_parents_and_repeated_edges() {
        let mut graph = FileGraph::new("package-lock.json");
        let a = graph.register_usage(Component::npm("a", "1.0.0").unwrap(), true, None);
        let b = graph.register_usage(Component::npm("b", "1.0.0").unwrap(), true, None);
        let shared = Component::npm("shared", "2.0.0").unwrap();
        graph.register_usage(shared.clone(), false, Some(&a));
        graph.register_usage(shared.clone(), false, Some(&a));
        graph.register_usage(shared, false, Some(&b));

        let sealed = graph.seal().unwrap();
        let edges: Vec<_> = sealed.edges().collect();
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&(a.as_str(), "shared 2.0.0 - Npm")));
        assert!(edges.contains(&(b.as_str(), "shared 2.0.0 - Npm")));
    }

    #[test]
    fn test_same_id_keeps_component_with_auxiliary_fields() {
        let mut graph = FileGraph::new("go.sum");
        graph.register_usage(Component::go("golang.org/x/text", "v0.14.0", Some("h1:x=")).unwrap(), false, None);
        graph.register_usage(Component::go("golang.org/x/text", "v0.14.0", None).unwrap(), false, None);

        let sealed = graph.seal().unwrap();
        let node = sealed.nodes.values().next().unwrap();
        assert_eq!(
            node.component,
            Component::go("golang.org/x/text", "v0.14.0", Some("h1:x=")).unwrap()
        );
    }

    #[test]
    fn test_development_flag_merges_with_and() {
        let mut graph = FileGraph::new("Pipfile.lock");
        let id = graph.register_usage_with(
            pip("pytest", "8.0.0"),
            Usage {
                explicit: true,
                development: Some(true),
                ..Usage::default()
            },
        );
        graph.register_usage_with(
            pip("pytest", "8.0.0"),
            Usage {
                explicit: true,
                development: Some(false),
                ..Usage::default()
            },
        );
        let sealed = graph.seal().unwrap();
        assert_eq!(sealed.nodes[&id].development, Some(false));
    }
}
