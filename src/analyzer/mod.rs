//! Manifest and lock-file parsers.
//!
//! Each analyzer turns one file into a [`FileGraph`]. Analyzers never see the
//! global graph; the scan pipeline seals and merges what they produce.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::graph::FileGraph;

pub mod conda;
pub mod dotnet;
pub mod go;
pub mod java;
pub mod node;
pub mod python;
pub mod rust;

/// Language families that can be excluded from a scan as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    Java,
    Node,
    Dotnet,
    Go,
    Conda,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Rust => write!(f, "Rust"),
            Language::Python => write!(f, "Python"),
            Language::Java => write!(f, "Java"),
            Language::Node => write!(f, "Node"),
            Language::Dotnet => write!(f, ".NET"),
            Language::Go => write!(f, "Go"),
            Language::Conda => write!(f, "Conda"),
        }
    }
}

/// A requirement the file declares without pinning a version. The scan
/// resolves it against the package index, or records `entry` as skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRequirement {
    pub name: String,
    pub specifiers: Vec<String>,
    /// The line as written, used when the requirement cannot be resolved.
    pub entry: String,
}

/// Result of analyzing one file.
#[derive(Debug)]
pub struct Analysis {
    pub graph: FileGraph,
    pub unresolved: Vec<UnresolvedRequirement>,
}

impl Analysis {
    pub fn new(path: &Path) -> Self {
        Self::from_graph(FileGraph::new(path.display().to_string()))
    }

    pub fn from_graph(graph: FileGraph) -> Self {
        Self {
            graph,
            unresolved: Vec::new(),
        }
    }
}

pub trait Analyzer: Send + Sync {
    /// Stable detector id, reported with every discovered manifest.
    fn id(&self) -> &'static str;

    fn language(&self) -> Language;

    /// File names this analyzer understands. A leading `*` matches any
    /// file name ending with the rest of the pattern.
    fn patterns(&self) -> &'static [&'static str];

    fn analyze(&self, path: &Path) -> Result<Analysis>;
}

/// Every analyzer, configured with the names the scan should never report.
pub fn all(ignore_packages: &[String]) -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::new(rust::RustAnalyzer::new()),
        Box::new(python::PythonAnalyzer::new(ignore_packages)),
        Box::new(java::JavaAnalyzer::new()),
        Box::new(node::NodeAnalyzer::new()),
        Box::new(dotnet::DotNetAnalyzer::new()),
        Box::new(go::GoAnalyzer::new()),
        Box::new(conda::CondaAnalyzer::new()),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    /// Write `content` to `name` inside a fresh temporary directory.
    pub fn manifest(name: &str, content: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    pub fn sibling(path: &Path, name: &str, content: &str) {
        std::fs::write(path.with_file_name(name), content).unwrap();
    }
}
