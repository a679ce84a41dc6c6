//! The concurrent scan pipeline.
//!
//! Every manifest is analyzed by its own task, which owns the file's graph
//! until it is sealed. The aggregator is the only state the tasks share.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

use crate::analyzer::{Analysis, Analyzer, UnresolvedRequirement};
use crate::container;
use crate::detector::ManifestFile;
use crate::graph::GraphAggregator;
use crate::models::Component;
use crate::registry::pypi;
use crate::version::PythonVersion;

/// Outcome of [`Scanner::scan`]. Failed files contributed nothing to the graph.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub merged: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

pub struct Scanner {
    analyzers: Arc<[Box<dyn Analyzer>]>,
    aggregator: Arc<GraphAggregator>,
    /// Set when unpinned requirements may be resolved against PyPI.
    client: Option<Client>,
}

impl Scanner {
    pub fn new(analyzers: Vec<Box<dyn Analyzer>>, client: Option<Client>) -> Self {
        Self {
            analyzers: Arc::from(analyzers),
            aggregator: Arc::new(GraphAggregator::new()),
            client,
        }
    }

    pub fn analyzers(&self) -> &[Box<dyn Analyzer>] {
        &self.analyzers
    }

    pub fn aggregator(&self) -> &GraphAggregator {
        &self.aggregator
    }

    pub fn into_aggregator(self) -> Arc<GraphAggregator> {
        self.aggregator
    }

    /// Analyze every manifest concurrently and merge each sealed graph.
    ///
    /// `manifests` must come from discovery over [`Scanner::analyzers`].
    /// A file that cannot be read, parsed or sealed is logged and reported
    /// in [`ScanReport::failed`]; so is one whose task panicked.
    pub async fn scan(&self, manifests: &[ManifestFile]) -> ScanReport {
        let mut tasks = JoinSet::new();
        let mut paths = HashMap::new();

        for manifest in manifests {
            let analyzers = Arc::clone(&self.analyzers);
            let aggregator = Arc::clone(&self.aggregator);
            let client = self.client.clone();
            let manifest = manifest.clone();
            let path = manifest.path.clone();
            let handle = tasks.spawn(async move {
                process(analyzers, manifest, &aggregator, client.as_ref()).await
            });
            paths.insert(handle.id(), path);
        }

        collect(tasks, paths).await
    }

    /// Merge the layers of a container scanner report.
    pub fn merge_container_scan(&self, path: &Path) -> Result<usize> {
        let output = container::load(path)?;
        let graphs = container::record(&output, &path.display().to_string());
        for graph in &graphs {
            self.aggregator.merge_file_graph(graph);
        }
        Ok(graphs.len())
    }
}

/// Wait for every file task. A task that panicked or was cancelled counts
/// as failed under the path it was spawned for.
async fn collect(mut tasks: JoinSet<Result<()>>, mut paths: HashMap<Id, PathBuf>) -> ScanReport {
    let mut report = ScanReport::default();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, result)) => (id, result),
            Err(err) => {
                let id = err.id();
                (id, Err(anyhow::anyhow!("file task did not complete: {err}")))
            }
        };
        let Some(path) = paths.remove(&id) else {
            warn!(task = %id, "result from an unknown file task");
            continue;
        };
        match outcome {
            Ok(()) => report.merged.push(path),
            Err(err) => {
                warn!(path = %path.display(), "skipping file: {err:#}");
                report.failed.push(path);
            }
        }
    }

    report.merged.sort();
    report.failed.sort();
    report
}

async fn process(
    analyzers: Arc<[Box<dyn Analyzer>]>,
    manifest: ManifestFile,
    aggregator: &GraphAggregator,
    client: Option<&Client>,
) -> Result<()> {
    let path = manifest.path.clone();
    let mut analysis = tokio::task::spawn_blocking(move || {
        analyzers[manifest.detector].analyze(&manifest.path)
    })
    .await
    .context("analyzer panicked")??;

    resolve_unpinned(&path, &mut analysis, client).await;

    let sealed = analysis.graph.seal()?;
    info!(
        path = %path.display(),
        components = sealed.len(),
        skipped = sealed.skipped.len(),
        "merging file graph"
    );
    aggregator.merge_file_graph(&sealed);
    Ok(())
}

/// Pin each unresolved requirement to its newest matching final release,
/// or record it as skipped when that is not possible.
async fn resolve_unpinned(path: &Path, analysis: &mut Analysis, client: Option<&Client>) {
    for requirement in std::mem::take(&mut analysis.unresolved) {
        let version = match client {
            Some(client) => latest_release(client, &requirement).await,
            None => None,
        };
        let Some(version) = version else {
            debug!(path = %path.display(), entry = %requirement.entry, "requirement left unresolved");
            analysis.graph.register_parse_failure(requirement.entry);
            continue;
        };
        match Component::pip(&requirement.name, version.as_str()) {
            Ok(component) => {
                analysis.graph.register_usage(component, true, None);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping resolved requirement");
                analysis.graph.register_parse_failure(requirement.entry);
            }
        }
    }
}

async fn latest_release(client: &Client, requirement: &UnresolvedRequirement) -> Option<PythonVersion> {
    let releases = match pypi::fetch_releases(client, &requirement.name).await {
        Ok(releases) => releases,
        Err(err) => {
            warn!(name = %requirement.name, "PyPI lookup failed: {err:#}");
            return None;
        }
    };
    match pypi::resolve_latest(&releases, &requirement.specifiers) {
        Ok(version) => version,
        Err(err) => {
            warn!(name = %requirement.name, error = %err, "cannot match releases");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::discover;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_scan_merges_every_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "requirements.txt", "requests==2.31.0\nflask>=2\n");
        write(
            dir.path(),
            "go.mod",
            "module x\n\nrequire (\n\tgithub.com/pkg/errors v0.9.1\n)\n",
        );
        write(
            dir.path(),
            "go.sum",
            "github.com/pkg/errors v0.9.1 h1:abc=\n",
        );
        write(dir.path(), "pom.xml", "<project><dependencies></project>");

        let scanner = Scanner::new(crate::analyzer::all(&[]), None);
        let manifests = discover(dir.path(), scanner.analyzers());
        assert_eq!(manifests.len(), 4);

        let report = scanner.scan(&manifests).await;
        assert_eq!(report.merged.len(), 3);
        assert_eq!(report.failed, vec![dir.path().join("pom.xml")]);

        let aggregator = scanner.aggregator();
        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.skipped_components(), vec!["flask>=2".to_string()]);

        let go = aggregator.snapshot();
        let node = go.node("github.com/pkg/errors v0.9.1 - Go").unwrap();
        assert!(node.explicit);
        assert_eq!(node.locations.len(), 2);
        assert_eq!(
            node.component,
            Component::go("github.com/pkg/errors", "v0.9.1", Some("h1:abc=")).unwrap()
        );
    }

    #[tokio::test]
    async fn test_container_scan_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "syft.json",
            r#"{"distro": {"id": "alpine", "versionID": "3.19"},
                "artifacts": [{"name": "musl", "version": "1.2.4-r2", "type": "apk",
                               "locations": [{"path": "/lib/apk/db/installed", "layerID": "sha256:1"}]}]}"#,
        );

        let scanner = Scanner::new(Vec::new(), None);
        let layers = scanner.merge_container_scan(&dir.path().join("syft.json")).unwrap();
        assert_eq!(layers, 1);
        assert_eq!(scanner.aggregator().roots(), vec!["alpine 3.19 musl 1.2.4-r2 - Linux"]);
    }

    fn explode() -> Result<()> {
        panic!("merge blew up")
    }

    #[tokio::test]
    async fn test_panicked_task_is_reported_failed() {
        let mut tasks = JoinSet::new();
        let mut paths = HashMap::new();
        let ok = tasks.spawn(async { Ok(()) });
        paths.insert(ok.id(), PathBuf::from("go.mod"));
        let broken = tasks.spawn(async { explode() });
        paths.insert(broken.id(), PathBuf::from("Cargo.lock"));
        let errored = tasks.spawn(async { Err(anyhow::anyhow!("bad toml")) });
        paths.insert(errored.id(), PathBuf::from("Pipfile.lock"));

        let report = collect(tasks, paths).await;
        assert_eq!(report.merged, vec![PathBuf::from("go.mod")]);
        assert_eq!(
            report.failed,
            vec![PathBuf::from("Cargo.lock"), PathBuf::from("Pipfile.lock")]
        );
    }

    #[tokio::test]
    async fn test_panicking_analyzer_is_reported_failed() {
        struct Exploding;

        impl Analyzer for Exploding {
            fn id(&self) -> &'static str {
                "exploding"
            }
            fn language(&self) -> crate::analyzer::Language {
                crate::analyzer::Language::Rust
            }
            fn patterns(&self) -> &'static [&'static str] {
                &["boom.lock"]
            }
            fn analyze(&self, _path: &Path) -> Result<Analysis> {
                panic!("analyzer blew up")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "boom.lock", "");
        let scanner = Scanner::new(vec![Box::new(Exploding)], None);
        let manifests = discover(dir.path(), scanner.analyzers());
        assert_eq!(manifests.len(), 1);

        let report = scanner.scan(&manifests).await;
        assert!(report.merged.is_empty());
        assert_eq!(report.failed, vec![dir.path().join("boom.lock")]);
        assert_eq!(scanner.aggregator().len(), 0);
    }
}
