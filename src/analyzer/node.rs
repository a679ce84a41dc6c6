use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{read_manifest, ScanError};
use crate::graph::{FileGraph, Usage};
use crate::models::Component;

use super::{Analysis, Language};

/// Analyzer for npm and yarn lock files.
pub struct NodeAnalyzer;

impl NodeAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl super::Analyzer for NodeAnalyzer {
    fn id(&self) -> &'static str {
        "npm"
    }

    fn language(&self) -> Language {
        Language::Node
    }

    fn patterns(&self) -> &'static [&'static str] {
        &["package-lock.json", "yarn.lock"]
    }

    fn analyze(&self, path: &Path) -> Result<Analysis> {
        let content = read_manifest(path)?;
        let mut graph = FileGraph::new(path.display().to_string());

        if path.file_name().and_then(|n| n.to_str()) == Some("yarn.lock") {
            let declared = read_package_json(&path.with_file_name("package.json"))?;
            parse_yarn_lock(&mut graph, path, &content, &declared);
        } else {
            let lock: PackageLock =
                serde_json::from_str(&content).map_err(|e| ScanError::parse(path, e))?;
            parse_package_lock(&mut graph, path, &lock)?;
        }

        Ok(Analysis::from_graph(graph))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageLock {
    #[serde(default)]
    lockfile_version: u32,
    #[serde(default)]
    packages: BTreeMap<String, LockPackage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockPackage {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    link: bool,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, String>,
}

impl LockPackage {
    fn runtime_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .keys()
            .chain(self.optional_dependencies.keys())
            .map(String::as_str)
    }
}

/// `package-lock.json` v2/v3 (the `packages` map keyed by install path).
fn parse_package_lock(graph: &mut FileGraph, path: &Path, lock: &PackageLock) -> Result<(), ScanError> {
    if lock.packages.is_empty() && lock.lockfile_version < 2 {
        return Err(ScanError::parse(
            path,
            format!("lockfileVersion {} has no packages map", lock.lockfile_version),
        ));
    }

    let root = lock.packages.get("").map(|r| {
        r.runtime_dependencies()
            .chain(r.dev_dependencies.keys().map(String::as_str))
            .collect::<HashSet<_>>()
    });

    let mut ids: HashMap<&str, (String, Component)> = HashMap::new();
    for (install_path, package) in &lock.packages {
        if install_path.is_empty() || package.link {
            continue;
        }
        let name = package
            .name
            .as_deref()
            .unwrap_or_else(|| package_name(install_path));
        let Some(version) = package.version.as_deref() else {
            debug!(path = %path.display(), entry = %install_path, "lock entry without a version");
            graph.register_parse_failure(install_path.clone());
            continue;
        };
        let component = match Component::npm(name, version) {
            Ok(component) => component,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping lock entry");
                graph.register_parse_failure(install_path.clone());
                continue;
            }
        };

        let top_level = install_path.strip_prefix("node_modules/") == Some(name);
        let explicit = top_level && root.as_ref().is_some_and(|r| r.contains(name));
        let id = graph.register_usage_with(
            component.clone(),
            Usage {
                explicit,
                development: Some(package.dev),
                parent: None,
            },
        );
        ids.insert(install_path.as_str(), (id, component));
    }

    for (install_path, package) in &lock.packages {
        let Some((parent_id, _)) = ids.get(install_path.as_str()) else {
            continue;
        };
        for dependency in package.runtime_dependencies() {
            match resolve_install_path(install_path, dependency, |p| ids.contains_key(p)) {
                Some(child_path) => {
                    let (_, child) = &ids[child_path.as_str()];
                    graph.register_usage(child.clone(), false, Some(parent_id));
                }
                None => debug!(
                    path = %path.display(),
                    parent = %install_path,
                    dependency = %dependency,
                    "dependency not installed"
                ),
            }
        }
    }

    Ok(())
}

/// `node_modules/a/node_modules/@scope/b` -> `@scope/b`
fn package_name(install_path: &str) -> &str {
    install_path
        .rsplit_once("node_modules/")
        .map_or(install_path, |(_, name)| name)
}

/// Node's module lookup: the nearest `node_modules` directory walking up
/// from the dependent package.
fn resolve_install_path(from: &str, dependency: &str, exists: impl Fn(&str) -> bool) -> Option<String> {
    let mut base = from.to_string();
    loop {
        let candidate = if base.is_empty() {
            format!("node_modules/{dependency}")
        } else {
            format!("{base}/node_modules/{dependency}")
        };
        if exists(&candidate) {
            return Some(candidate);
        }
        if base.is_empty() {
            return None;
        }
        base = match base.rfind("/node_modules/") {
            Some(i) => base[..i].to_string(),
            None => String::new(),
        };
    }
}

/// Names declared in `package.json`; an absent file declares nothing.
fn read_package_json(path: &Path) -> Result<HashSet<String>, ScanError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let content = read_manifest(path)?;
    let json: Value = serde_json::from_str(&content).map_err(|e| ScanError::parse(path, e))?;

    let mut names = HashSet::new();
    for section in ["dependencies", "devDependencies", "optionalDependencies", "peerDependencies"] {
        if let Some(deps) = json.get(section).and_then(Value::as_object) {
            names.extend(deps.keys().cloned());
        }
    }
    Ok(names)
}

#[derive(Debug, Default)]
struct YarnEntry {
    name: String,
    version: Option<String>,
    specs: Vec<String>,
    dependencies: Vec<String>,
}

/// Parse a classic (v1) `yarn.lock`.
fn parse_yarn_lock(graph: &mut FileGraph, path: &Path, content: &str, declared: &HashSet<String>) {
    let entries = yarn_entries(content);

    let mut by_spec: HashMap<&str, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        for spec in &entry.specs {
            by_spec.insert(spec.as_str(), i);
        }
    }

    let mut registered: Vec<Option<(String, Component)>> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let component = entry
            .version
            .as_deref()
            .map(|version| Component::npm(&entry.name, version));
        match component {
            Some(Ok(component)) => {
                let explicit = declared.contains(&entry.name);
                let id = graph.register_usage(component.clone(), explicit, None);
                registered.push(Some((id, component)));
            }
            Some(Err(err)) => {
                warn!(path = %path.display(), error = %err, "skipping yarn entry");
                graph.register_parse_failure(entry.specs.join(", "));
                registered.push(None);
            }
            None => {
                graph.register_parse_failure(entry.specs.join(", "));
                registered.push(None);
            }
        }
    }

    for (entry, parent) in entries.iter().zip(&registered) {
        let Some((parent_id, _)) = parent else {
            continue;
        };
        for spec in &entry.dependencies {
            match by_spec.get(spec.as_str()).and_then(|&i| registered[i].as_ref()) {
                Some((_, child)) => {
                    graph.register_usage(child.clone(), false, Some(parent_id));
                }
                None => debug!(path = %path.display(), spec = %spec, "unresolved yarn dependency"),
            }
        }
    }
}

fn yarn_entries(content: &str) -> Vec<YarnEntry> {
    let mut entries: Vec<YarnEntry> = Vec::new();
    let mut in_dependencies = false;

    for line in content.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        let line = line.trim();

        if indent == 0 {
            // "@scope/foo@^1.0.0", foo@~1.0.0:
            let specs: Vec<String> = line
                .trim_end_matches(':')
                .split(',')
                .map(|s| s.trim().trim_matches('"').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            let name = specs.first().map(|s| spec_name(s).to_string()).unwrap_or_default();
            entries.push(YarnEntry {
                name,
                specs,
                ..YarnEntry::default()
            });
            in_dependencies = false;
            continue;
        }

        let Some(entry) = entries.last_mut() else {
            continue;
        };
        if indent <= 2 {
            in_dependencies = line == "dependencies:" || line == "optionalDependencies:";
            if let Some(version) = line.strip_prefix("version ") {
                entry.version = Some(version.trim().trim_matches('"').to_string());
            }
        } else if in_dependencies {
            if let Some((name, range)) = line.split_once(' ') {
                let name = name.trim_matches('"');
                let range = range.trim().trim_matches('"');
                entry.dependencies.push(format!("{name}@{range}"));
            }
        }
    }

    entries
}

/// `@scope/foo@^1.0.0` -> `@scope/foo`
fn spec_name(spec: &str) -> &str {
    match spec.get(1..).and_then(|rest| rest.find('@')) {
        Some(i) => &spec[..i + 1],
        None => spec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::test_support::{manifest, sibling};
    use crate::analyzer::Analyzer;

    const LOCK: &str = r#"{
  "name": "my-app",
  "lockfileVersion": 3,
  "packages": {
    "": {
      "name": "my-app",
      "version": "1.0.0",
      "dependencies": { "express": "^4.18.2" },
      "devDependencies": { "jest": "^29.0.0" }
    },
    "node_modules/express": {
      "version": "4.18.2",
      "dependencies": { "debug": "2.6.9", "ms": "2.1.3" }
    },
    "node_modules/express/node_modules/debug": {
      "version": "2.6.9",
      "dependencies": { "ms": "2.0.0" }
    },
    "node_modules/express/node_modules/debug/node_modules/ms": {
      "version": "2.0.0"
    },
    "node_modules/ms": {
      "version": "2.1.3"
    },
    "node_modules/jest": {
      "version": "29.7.0",
      "dev": true
    }
  }
}"#;

    #[test]
    fn test_parse_package_lock_json() {
        let (_dir, path) = manifest("package-lock.json", LOCK);
        let sealed = NodeAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();

        assert_eq!(sealed.len(), 5);
        assert_eq!(sealed.is_explicit("express 4.18.2 - Npm"), Some(true));
        assert_eq!(sealed.is_explicit("jest 29.7.0 - Npm"), Some(true));
        assert_eq!(sealed.is_explicit("ms 2.1.3 - Npm"), Some(false));
        assert_eq!(sealed.nodes["jest 29.7.0 - Npm"].development, Some(true));

        let edges: Vec<_> = sealed.edges().collect();
        assert_eq!(
            edges,
            vec![
                ("debug 2.6.9 - Npm", "ms 2.0.0 - Npm"),
                ("express 4.18.2 - Npm", "debug 2.6.9 - Npm"),
                ("express 4.18.2 - Npm", "ms 2.1.3 - Npm"),
            ]
        );
    }

    #[test]
    fn test_resolve_install_path_walks_up() {
        let installed = ["node_modules/a", "node_modules/a/node_modules/b", "node_modules/c"];
        let exists = |p: &str| installed.contains(&p);
        assert_eq!(
            resolve_install_path("node_modules/a/node_modules/b", "c", exists).as_deref(),
            Some("node_modules/c")
        );
        assert_eq!(
            resolve_install_path("node_modules/a", "b", exists).as_deref(),
            Some("node_modules/a/node_modules/b")
        );
        assert_eq!(resolve_install_path("node_modules/a", "zzz", exists), None);
        assert_eq!(package_name("node_modules/a/node_modules/@scope/b"), "@scope/b");
    }

    #[test]
    fn test_parse_yarn_lock() {
        let yarn = r#"# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.
# yarn lockfile v1


"@babel/code-frame@^7.0.0", "@babel/code-frame@^7.10.4":
  version "7.12.13"
  resolved "https://registry.yarnpkg.com/@babel/code-frame/-/code-frame-7.12.13.tgz"
  dependencies:
    js-tokens "^4.0.0"

js-tokens@^4.0.0:
  version "4.0.0"
"#;
        let (_dir, path) = manifest("yarn.lock", yarn);
        sibling(&path, "package.json", r#"{"dependencies": {"@babel/code-frame": "^7.10.4"}}"#);

        let sealed = NodeAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();
        assert_eq!(sealed.is_explicit("@babel/code-frame 7.12.13 - Npm"), Some(true));
        assert_eq!(sealed.is_explicit("js-tokens 4.0.0 - Npm"), Some(false));
        assert_eq!(
            sealed.edges().collect::<Vec<_>>(),
            vec![("@babel/code-frame 7.12.13 - Npm", "js-tokens 4.0.0 - Npm")]
        );
    }

    #[test]
    fn test_spec_name() {
        assert_eq!(spec_name("@scope/foo@^1.0.0"), "@scope/foo");
        assert_eq!(spec_name("foo@~1.0.0"), "foo");
        assert_eq!(spec_name("foo"), "foo");
    }
}
