use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{read_manifest, ScanError};
use crate::graph::Usage;
use crate::models::Component;
use crate::version::DependencySpecification;

use super::{Analysis, Language};

#[derive(Debug, Deserialize)]
struct CargoLock {
    #[serde(default)]
    package: Vec<CargoLockPackage>,
}

#[derive(Debug, Deserialize)]
struct CargoLockPackage {
    name: String,
    version: String,
    /// Packages without a `source` field are local workspace members.
    source: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// The dependency tables of the sibling `Cargo.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CargoManifest {
    #[serde(default)]
    dependencies: HashMap<String, toml::Value>,
    #[serde(default)]
    dev_dependencies: HashMap<String, toml::Value>,
    #[serde(default)]
    build_dependencies: HashMap<String, toml::Value>,
    #[serde(default)]
    workspace: Option<CargoWorkspace>,
}

#[derive(Debug, Default, Deserialize)]
struct CargoWorkspace {
    #[serde(default)]
    dependencies: HashMap<String, toml::Value>,
}

/// Analyzer for `Cargo.lock`.
///
/// Every registry/git package becomes a component and every lock-file
/// `dependencies` entry an edge. Whatever a workspace member of the lock
/// file depends on is direct; the dependency tables of a sibling
/// `Cargo.toml` add to that and decide which direct ones are development only.
pub struct RustAnalyzer;

impl RustAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl super::Analyzer for RustAnalyzer {
    fn id(&self) -> &'static str {
        "cargo-lock"
    }

    fn language(&self) -> Language {
        Language::Rust
    }

    fn patterns(&self) -> &'static [&'static str] {
        &["Cargo.lock"]
    }

    fn analyze(&self, path: &Path) -> Result<Analysis> {
        let content = read_manifest(path)?;
        let lock: CargoLock = toml::from_str(&content).map_err(|e| ScanError::parse(path, e))?;

        let mut direct = DirectDependencies::from_workspace_members(&lock);
        let manifest_path = path.with_file_name("Cargo.toml");
        if manifest_path.exists() {
            let content = read_manifest(&manifest_path)?;
            let manifest: CargoManifest =
                toml::from_str(&content).map_err(|e| ScanError::parse(&manifest_path, e))?;
            direct.refine(&manifest);
        }

        let mut analysis = Analysis::new(path);
        let graph = &mut analysis.graph;

        let index = LockIndex::new(&lock.package);
        let mut nodes: Vec<Option<(String, Component)>> = Vec::with_capacity(lock.package.len());

        for package in &lock.package {
            if package.source.is_none() {
                nodes.push(None);
                continue;
            }
            match Component::cargo(&package.name, &package.version, package.source.as_deref()) {
                Ok(component) => {
                    let usage = direct.usage(path, &package.name, &package.version);
                    let id = graph.register_usage_with(component.clone(), usage);
                    nodes.push(Some((id, component)));
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping lock entry");
                    graph.register_parse_failure(format!("{} {}", package.name, package.version));
                    nodes.push(None);
                }
            }
        }

        for (package, parent) in lock.package.iter().zip(&nodes) {
            let Some((parent_id, _)) = parent else {
                continue;
            };
            for entry in &package.dependencies {
                match index.resolve(entry).and_then(|i| nodes[i].as_ref()) {
                    Some((_, child)) => {
                        graph.register_usage(child.clone(), false, Some(parent_id));
                    }
                    None => debug!(path = %path.display(), entry = %entry, "unresolved lock dependency"),
                }
            }
        }

        Ok(analysis)
    }
}

/// Lookup of `dependencies` entries (`name`, `name version` or
/// `name version (source)`) to package positions.
struct LockIndex<'a> {
    by_name: HashMap<&'a str, Vec<usize>>,
    packages: &'a [CargoLockPackage],
}

impl<'a> LockIndex<'a> {
    fn new(packages: &'a [CargoLockPackage]) -> Self {
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, package) in packages.iter().enumerate() {
            by_name.entry(package.name.as_str()).or_default().push(i);
        }
        Self { by_name, packages }
    }

    fn resolve(&self, entry: &str) -> Option<usize> {
        let mut parts = entry.split_whitespace();
        let name = parts.next()?;
        let version = parts.next();
        let candidates = self.by_name.get(name)?;
        match (candidates.as_slice(), version) {
            ([only], _) => Some(*only),
            (_, Some(version)) => candidates
                .iter()
                .copied()
                .find(|&i| self.packages[i].version == version),
            (_, None) => None,
        }
    }
}

/// Packages the workspace depends on directly.
struct DirectDependencies {
    /// `name version` of every dependency of a lock-file workspace member.
    members: HashSet<String>,
    manifest: Option<ManifestTables>,
}

struct ManifestTables {
    normal: DependencySpecification,
    dev: DependencySpecification,
}

impl DirectDependencies {
    fn from_workspace_members(lock: &CargoLock) -> Self {
        let index = LockIndex::new(&lock.package);
        let members = lock
            .package
            .iter()
            .filter(|p| p.source.is_none())
            .flat_map(|member| member.dependencies.iter())
            .filter_map(|entry| index.resolve(entry))
            .map(|i| format!("{} {}", lock.package[i].name, lock.package[i].version))
            .collect();
        Self {
            members,
            manifest: None,
        }
    }

    fn refine(&mut self, manifest: &CargoManifest) {
        let mut normal = DependencySpecification::new();
        let mut dev = DependencySpecification::new();

        let workspace = manifest.workspace.as_ref().map(|w| &w.dependencies);
        for table in [&manifest.dependencies, &manifest.build_dependencies]
            .into_iter()
            .chain(workspace)
        {
            add_table(&mut normal, table);
        }
        add_table(&mut dev, &manifest.dev_dependencies);

        self.manifest = Some(ManifestTables { normal, dev });
    }

    fn usage(&self, path: &Path, name: &str, version: &str) -> Usage<'static> {
        let member = self.members.contains(&format!("{name} {version}"));
        let (declared, development) = match &self.manifest {
            Some(tables) => {
                let normal = satisfies(path, &tables.normal, name, version);
                let dev = satisfies(path, &tables.dev, name, version);
                (normal || dev, (normal || dev).then_some(!normal))
            }
            None => (false, None),
        };
        Usage {
            explicit: member || declared,
            development,
            parent: None,
        }
    }
}

fn satisfies(path: &Path, spec: &DependencySpecification, name: &str, version: &str) -> bool {
    spec.matches_package(name, version).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "cannot match {name} against Cargo.toml");
        false
    })
}

/// Register each entry of a `Cargo.toml` dependency table under its real
/// crate name. Path and git dependencies without a version match anything.
fn add_table(spec: &mut DependencySpecification, table: &HashMap<String, toml::Value>) {
    for (key, value) in table {
        let (name, requirement) = match value {
            toml::Value::String(requirement) => (key.as_str(), requirement.as_str()),
            toml::Value::Table(table) => (
                table.get("package").and_then(|p| p.as_str()).unwrap_or(key.as_str()),
                table.get("version").and_then(|v| v.as_str()).unwrap_or("*"),
            ),
            _ => continue,
        };
        if let Err(err) = spec.add(name, &manifest_requirement(requirement)) {
            warn!(error = %err, "ignoring requirement for {name}");
        }
    }
}

/// In a manifest a bare version means a caret requirement.
fn manifest_requirement(requirement: &str) -> String {
    requirement
        .split(',')
        .map(|term| {
            let term = term.trim();
            if term.starts_with(|c: char| c.is_ascii_digit()) && !term.contains('*') {
                format!("^{term}")
            } else {
                term.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::test_support::{manifest, sibling};
    use crate::analyzer::Analyzer;

    const LOCK: &str = r#"
version = 3

[[package]]
name = "my-app"
version = "0.1.0"
dependencies = [
 "serde",
 "tokio",
]

[[package]]
name = "serde"
version = "1.0.150"
source = "registry+https://github.com/rust-lang/crates.io-index"
checksum = "abc123"

[[package]]
name = "tokio"
version = "1.25.0"
source = "registry+https://github.com/rust-lang/crates.io-index"
checksum = "def456"
dependencies = [
 "mio",
]

[[package]]
name = "mio"
version = "0.8.5"
source = "registry+https://github.com/rust-lang/crates.io-index"
"#;

    #[test]
    fn test_workspace_members_mark_direct_dependencies() {
        let (_dir, path) = manifest("Cargo.lock", LOCK);
        let sealed = RustAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();

        assert_eq!(sealed.len(), 3);
        assert_eq!(sealed.is_explicit("serde 1.0.150 - Cargo"), Some(true));
        assert_eq!(sealed.is_explicit("tokio 1.25.0 - Cargo"), Some(true));
        assert_eq!(sealed.is_explicit("mio 0.8.5 - Cargo"), Some(false));
        assert_eq!(
            sealed.edges().collect::<Vec<_>>(),
            vec![("tokio 1.25.0 - Cargo", "mio 0.8.5 - Cargo")]
        );
    }

    #[test]
    fn test_cargo_toml_requirements_decide_explicit() {
        let (_dir, path) = manifest("Cargo.lock", LOCK);
        sibling(
            &path,
            "Cargo.toml",
            r#"
[package]
name = "my-app"
version = "0.1.0"

[dependencies]
serde = "1.0"

[dev-dependencies]
tokio = { version = "1.25", features = ["full"] }
"#,
        );

        let sealed = RustAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();
        assert_eq!(sealed.is_explicit("serde 1.0.150 - Cargo"), Some(true));
        assert_eq!(sealed.is_explicit("tokio 1.25.0 - Cargo"), Some(true));
        assert_eq!(sealed.is_explicit("mio 0.8.5 - Cargo"), Some(false));
        assert_eq!(sealed.nodes["tokio 1.25.0 - Cargo"].development, Some(true));
        assert_eq!(sealed.nodes["serde 1.0.150 - Cargo"].development, Some(false));
    }

    #[test]
    fn test_requirement_outside_range_leaves_development_unknown() {
        let (_dir, path) = manifest("Cargo.lock", LOCK);
        sibling(&path, "Cargo.toml", "[dependencies]\nserde = \"=1.0.100\"\n");

        let sealed = RustAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();
        assert_eq!(sealed.is_explicit("serde 1.0.150 - Cargo"), Some(true));
        assert_eq!(sealed.nodes["serde 1.0.150 - Cargo"].development, None);
        assert_eq!(sealed.is_explicit("mio 0.8.5 - Cargo"), Some(false));
    }

    #[test]
    fn test_virtual_workspace_keeps_member_dependencies() {
        let (_dir, path) = manifest("Cargo.lock", LOCK);
        sibling(&path, "Cargo.toml", "[workspace]\nmembers = [\"my-app\"]\n");

        let sealed = RustAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();
        assert_eq!(sealed.is_explicit("serde 1.0.150 - Cargo"), Some(true));
        assert_eq!(sealed.is_explicit("tokio 1.25.0 - Cargo"), Some(true));
        assert_eq!(sealed.is_explicit("mio 0.8.5 - Cargo"), Some(false));
    }

    #[test]
    fn test_manifest_adds_to_member_dependencies() {
        let (_dir, path) = manifest("Cargo.lock", LOCK);
        sibling(
            &path,
            "Cargo.toml",
            "[workspace]\nmembers = [\"my-app\"]\n\n[workspace.dependencies]\nmio = \"0.8\"\n",
        );

        let sealed = RustAnalyzer::new().analyze(&path).unwrap().graph.seal().unwrap();
        assert_eq!(sealed.is_explicit("mio 0.8.5 - Cargo"), Some(true));
        assert_eq!(sealed.nodes["mio 0.8.5 - Cargo"].development, Some(false));
        assert_eq!(sealed.is_explicit("tokio 1.25.0 - Cargo"), Some(true));
    }

    #[test]
    fn test_manifest_requirement_adds_caret() {
        assert_eq!(manifest_requirement("1.0"), "^1.0");
        assert_eq!(manifest_requirement(">=1.2, <1.5"), ">=1.2, <1.5");
        assert_eq!(manifest_requirement("=0.9.1"), "=0.9.1");
        assert_eq!(manifest_requirement("1.*"), "1.*");
    }

    #[test]
    fn test_malformed_lock_is_an_error() {
        let (_dir, path) = manifest("Cargo.lock", "[[package]\nname = ");
        assert!(RustAnalyzer::new().analyze(&path).is_err());
    }
}
