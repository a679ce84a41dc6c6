use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{read_manifest, ScanError};
use crate::graph::{FileGraph, Usage};
use crate::models::Component;
use crate::version::{PythonSpecifier, PythonVersion};

use super::{Analysis, Language, UnresolvedRequirement};

/// Analyzer for Python projects.
///
/// `requirements.txt` and `pyproject.toml` list direct requirements: pinned
/// ones (`name==version`) are registered right away, the rest are handed
/// back unresolved. `Pipfile.lock` is fully pinned.
pub struct PythonAnalyzer {
    /// Lowercased names never registered (packaging tools themselves).
    ignored: HashSet<String>,
}

impl PythonAnalyzer {
    pub fn new(ignore_packages: &[String]) -> Self {
        Self {
            ignored: ignore_packages.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(&name.to_lowercase())
    }
}

impl super::Analyzer for PythonAnalyzer {
    fn id(&self) -> &'static str {
        "pip"
    }

    fn language(&self) -> Language {
        Language::Python
    }

    fn patterns(&self) -> &'static [&'static str] {
        &["requirements.txt", "pyproject.toml", "Pipfile.lock"]
    }

    fn analyze(&self, path: &Path) -> Result<Analysis> {
        let content = read_manifest(path)?;
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        match file_name {
            "Pipfile.lock" => self.parse_pipfile_lock(path, &content),
            "pyproject.toml" => {
                let pyproject: Pyproject =
                    toml::from_str(&content).map_err(|e| ScanError::parse(path, e))?;
                let lines = pyproject.project.map(PyprojectProject::requirements).unwrap_or_default();
                self.register_requirements(path, lines.iter().map(String::as_str))
            }
            _ => self.register_requirements(path, content.lines()),
        }
    }
}

impl PythonAnalyzer {
    fn register_requirements<'a>(
        &self,
        path: &Path,
        lines: impl Iterator<Item = &'a str>,
    ) -> Result<Analysis> {
        let parser = RequirementParser::new()?;
        let mut analysis = Analysis::new(path);

        for line in lines {
            let line = strip_comment(line);
            if line.is_empty() || line.starts_with('-') {
                continue;
            }
            match parser.parse(line) {
                Ok(requirement) if self.is_ignored(requirement.name()) => {
                    debug!(path = %path.display(), name = requirement.name(), "ignored package");
                }
                Ok(Requirement::Pinned { name, version }) => match Component::pip(&name, &version) {
                    Ok(component) => {
                        analysis.graph.register_usage(component, true, None);
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping requirement");
                        analysis.graph.register_parse_failure(line);
                    }
                },
                Ok(Requirement::Unpinned { name, specifiers }) => {
                    analysis.unresolved.push(UnresolvedRequirement {
                        name,
                        specifiers,
                        entry: line.to_string(),
                    });
                }
                Err(reason) => {
                    warn!(path = %path.display(), line = %line, "skipping requirement: {reason}");
                    analysis.graph.register_parse_failure(line);
                }
            }
        }

        Ok(analysis)
    }

    /// `Pipfile.lock`: JSON with `default` and `develop` sections.
    fn parse_pipfile_lock(&self, path: &Path, content: &str) -> Result<Analysis> {
        let lock: PipfileLock = serde_json::from_str(content).map_err(|e| ScanError::parse(path, e))?;
        let mut graph = FileGraph::new(path.display().to_string());

        for (section, development) in [(&lock.default, false), (&lock.develop, true)] {
            for (name, entry) in section {
                if self.is_ignored(name) {
                    continue;
                }
                let Some(version) = entry.version.as_deref().and_then(|v| v.strip_prefix("==")) else {
                    debug!(path = %path.display(), name = %name, "lock entry without a pinned version");
                    graph.register_parse_failure(name.clone());
                    continue;
                };
                match Component::pip(name, version) {
                    Ok(component) => {
                        graph.register_usage_with(
                            component,
                            Usage {
                                explicit: true,
                                development: Some(development),
                                parent: None,
                            },
                        );
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping lock entry");
                        graph.register_parse_failure(format!("{name} {version}"));
                    }
                }
            }
        }

        Ok(Analysis::from_graph(graph))
    }
}

fn strip_comment(line: &str) -> &str {
    let line = match line.find(" #") {
        Some(i) => &line[..i],
        None => line,
    };
    let line = line.trim();
    if line.starts_with('#') {
        ""
    } else {
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Pinned { name: String, version: String },
    Unpinned { name: String, specifiers: Vec<String> },
}

impl Requirement {
    fn name(&self) -> &str {
        match self {
            Requirement::Pinned { name, .. } | Requirement::Unpinned { name, .. } => name,
        }
    }
}

struct RequirementParser {
    re: Regex,
}

impl RequirementParser {
    fn new() -> Result<Self> {
        Ok(Self {
            re: Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(.*)$")?,
        })
    }

    /// Parse a PEP 508 requirement, ignoring extras and environment markers.
    fn parse(&self, line: &str) -> Result<Requirement, String> {
        let requirement = line.split(';').next().unwrap_or_default().trim();
        let caps = self
            .re
            .captures(requirement)
            .ok_or_else(|| "not a requirement".to_string())?;
        let name = caps[1].to_string();
        let rest = caps[2].trim();

        if rest.starts_with('@') {
            return Err("direct URL references are not resolved".to_string());
        }
        let rest = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .unwrap_or(rest);

        let specifiers: Vec<String> = rest
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        for spec in &specifiers {
            PythonSpecifier::parse(spec).map_err(|e| e.to_string())?;
        }

        if let [only] = specifiers.as_slice() {
            if let Some(version) = only.strip_prefix("==").filter(|v| !v.starts_with('=') && !v.ends_with(".*")) {
                let version = version.trim();
                PythonVersion::parse(version).map_err(|e| e.to_string())?;
                return Ok(Requirement::Pinned {
                    name,
                    version: version.to_string(),
                });
            }
        }

        Ok(Requirement::Unpinned { name, specifiers })
    }
}

#[derive(Debug, Deserialize)]
struct PipfileLock {
    #[serde(default)]
    default: BTreeMap<String, PipfileLockEntry>,
    #[serde(default)]
    develop: BTreeMap<String, PipfileLockEntry>,
}

#[derive(Debug, Deserialize)]
struct PipfileLockEntry {
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Pyproject {
    project: Option<PyprojectProject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PyprojectProject {
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, Vec<String>>,
}

impl PyprojectProject {
    fn requirements(self) -> Vec<String> {
        self.dependencies
            .into_iter()
            .chain(self.optional_dependencies.into_values().flatten())
            .collect()
    }
}
