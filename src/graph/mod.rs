//! Dependency-graph recording.
//!
//! - [`file_graph`] — per-file builder. Each analyzer owns one exclusively while
//!   it parses a manifest, then seals it.
//! - [`aggregator`] — the global graph. Sealed file graphs are merged into it
//!   under a single lock; merge is a set union with explicit-flag OR.

pub mod aggregator;
pub mod file_graph;

pub use aggregator::{DependencyGraph, GraphAggregator, GraphNode};
pub use file_graph::{FileGraph, SealedFileGraph, Usage};

/// Combine two development observations. Unknown defers to the other side;
/// a component stays development-only only while every observation agrees.
pub(crate) fn merge_development(current: Option<bool>, incoming: Option<bool>) -> Option<bool> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a && b),
        (a, None) => a,
        (None, b) => b,
    }
}
