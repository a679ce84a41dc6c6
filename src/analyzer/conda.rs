use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{read_manifest, ScanError};
use crate::graph::Usage;
use crate::models::{CondaExtras, Component};

use super::{Analysis, Language};

#[derive(Debug, Deserialize)]
struct CondaLock {
    version: Option<u32>,
    #[serde(default)]
    package: Vec<LockedPackage>,
}

#[derive(Debug, Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
    #[serde(default)]
    manager: String,
    #[serde(default)]
    platform: String,
    /// Only the names matter; the values are version constraints.
    #[serde(default)]
    dependencies: BTreeMap<String, serde_yml::Value>,
    url: Option<String>,
    #[serde(default)]
    hash: LockHash,
    category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LockHash {
    md5: Option<String>,
}

impl LockedPackage {
    /// Build string, channel and subdir, recovered from a conda package URL
    /// of the form `<channel base>/<channel>/<subdir>/<name>-<version>-<build>.conda`.
    fn url_parts(&self) -> Option<(&str, &str, &str)> {
        if self.manager != "conda" {
            return None;
        }
        let mut segments = self.url.as_deref()?.rsplit('/');
        let file = segments.next()?;
        let subdir = segments.next()?;
        let channel = segments.next()?;
        let stem = file
            .strip_suffix(".conda")
            .or_else(|| file.strip_suffix(".tar.bz2"))?;
        let build = stem.strip_prefix(&format!("{}-{}-", self.name, self.version))?;
        Some((build, channel, subdir))
    }

    fn component(&self) -> Result<Component, crate::error::IdentityError> {
        let (build, channel, subdir) = match self.url_parts() {
            Some((build, channel, subdir)) => (Some(build), Some(channel), Some(subdir)),
            None => (None, None, None),
        };
        Component::conda(
            &self.name,
            &self.version,
            CondaExtras {
                build,
                channel,
                subdir,
                md5: self.hash.md5.as_deref(),
            },
        )
    }
}

/// Analyzer for `conda-lock.yml`.
///
/// Every locked package becomes a Conda component, including the ones
/// installed through pip. A package's `dependencies` are looked up on the
/// same platform; packages nothing else depends on are the direct ones.
pub struct CondaAnalyzer;

impl CondaAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl super::Analyzer for CondaAnalyzer {
    fn id(&self) -> &'static str {
        "conda-lock"
    }

    fn language(&self) -> Language {
        Language::Conda
    }

    fn patterns(&self) -> &'static [&'static str] {
        &["conda-lock.yml", "*.conda-lock.yml"]
    }

    fn analyze(&self, path: &Path) -> Result<Analysis> {
        let content = read_manifest(path)?;
        let lock: CondaLock = serde_yml::from_str(&content).map_err(|e| ScanError::parse(path, e))?;
        debug!(path = %path.display(), version = ?lock.version, packages = lock.package.len(), "conda-lock file");

        let mut analysis = Analysis::new(path);
        let graph = &mut analysis.graph;

        let components: Vec<Option<Component>> = lock
            .package
            .iter()
            .map(|package| match package.component() {
                Ok(component) => Some(component),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping locked package");
                    graph.register_parse_failure(format!("{} {}", package.name, package.version));
                    None
                }
            })
            .collect();

        let by_platform: BTreeMap<(&str, &str), usize> = lock
            .package
            .iter()
            .enumerate()
            .filter(|(i, _)| components[*i].is_some())
            .map(|(i, p)| ((p.name.as_str(), p.platform.as_str()), i))
            .collect();

        let mut edges = Vec::new();
        for (i, package) in lock.package.iter().enumerate() {
            if components[i].is_none() {
                continue;
            }
            for dependency in package.dependencies.keys() {
                match by_platform.get(&(dependency.as_str(), package.platform.as_str())) {
                    Some(&child) => edges.push((i, child)),
                    None => debug!(
                        path = %path.display(),
                        package = %package.name,
                        dependency = %dependency,
                        "dependency not locked for platform {}",
                        package.platform
                    ),
                }
            }
        }

        let children: HashSet<String> = edges
            .iter()
            .filter_map(|&(_, child)| components[child].as_ref())
            .map(Component::id)
            .collect();

        let mut ids = Vec::with_capacity(components.len());
        for (package, component) in lock.package.iter().zip(&components) {
            let id = component.as_ref().map(|component| {
                graph.register_usage_with(
                    component.clone(),
                    Usage {
                        explicit: !children.contains(&component.id()),
                        development: package.category.as_deref().map(|c| c != "main"),
                        parent: None,
                    },
                )
            });
            ids.push(id);
        }

        for (parent, child) in edges {
            if let (Some(parent_id), Some(component)) = (&ids[parent], &components[child]) {
                graph.register_usage(component.clone(), false, Some(parent_id));
            }
        }

        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::test_support::manifest;
    use crate::analyzer::Analyzer;

    const LOCK: &str = r#"
version: 1
metadata:
  platforms:
  - linux-64
package:
- name: conda-lock
  version: 2.1.0
  manager: conda
  platform: linux-64
  dependencies:
    python: '>=3.8'
    urllib3: '>=1.26.5,<2.0'
  url: https://conda.anaconda.org/conda-forge/noarch/conda-lock-2.1.0-pyhd8ed1ab_0.conda
  hash:
    md5: 0a11c79fcc6a0e7d0b5b2b4e1a8f6b3c
    sha256: 1234
  category: main
  optional: false
- name: urllib3
  version: 1.26.18
  manager: pip
  platform: linux-64
  dependencies: {}
  url: https://files.pythonhosted.org/packages/urllib3-1.26.18-py2.py3-none-any.whl
  hash:
    sha256: abcd
  category: main
  optional: false
- name: pytest
  version: 8.0.0
  manager: conda
  platform: linux-64
  dependencies:
    python: '>=3.8'
  url: https://conda.anaconda.org/conda-forge/noarch/pytest-8.0.0-pyhd8ed1ab_0.conda
  hash:
    md5: ffff
  category: dev
  optional: true
"#;

    #[test]
    fn test_parse_conda_lock() {
        let (_dir, path) = manifest("conda-lock.yml", LOCK);
        let sealed = CondaAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();

        let lock_id = "conda-lock 2.1.0 pyhd8ed1ab_0 conda-forge noarch - Conda";
        let urllib3_id = "urllib3 1.26.18    - Conda";
        assert_eq!(sealed.len(), 3);
        assert_eq!(sealed.is_explicit(lock_id), Some(true));
        assert_eq!(sealed.is_explicit(urllib3_id), Some(false));
        assert_eq!(sealed.edges().collect::<Vec<_>>(), vec![(lock_id, urllib3_id)]);

        let pytest = &sealed.nodes["pytest 8.0.0 pyhd8ed1ab_0 conda-forge noarch - Conda"];
        assert!(pytest.explicit);
        assert_eq!(pytest.development, Some(true));
    }

    #[test]
    fn test_url_parts() {
        let lock: CondaLock = serde_yml::from_str(LOCK).unwrap();
        assert_eq!(
            lock.package[0].url_parts(),
            Some(("pyhd8ed1ab_0", "conda-forge", "noarch"))
        );
        assert_eq!(lock.package[1].url_parts(), None);
    }

    #[test]
    fn test_dependencies_do_not_cross_platforms() {
        let content = r#"
version: 1
package:
- name: a
  version: '1.0'
  manager: conda
  platform: linux-64
  dependencies:
    b: '*'
- name: b
  version: '2.0'
  manager: conda
  platform: osx-arm64
"#;
        let (_dir, path) = manifest("env.conda-lock.yml", content);
        let sealed = CondaAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();
        assert_eq!(sealed.edges().count(), 0);
        assert!(sealed.component_ids().all(|id| sealed.is_explicit(id) == Some(true)));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let (_dir, path) = manifest("conda-lock.yml", "package: [name: {");
        assert!(CondaAnalyzer::new().analyze(&path).is_err());
    }
}
