use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{read_manifest, ScanError};
use crate::graph::FileGraph;
use crate::models::Component;

use super::{Analysis, Language};

/// Analyzer for .NET projects using NuGet or Paket.
///
/// Supports three manifest formats:
/// - SDK-style `*.csproj` / `*.fsproj` (`<PackageReference>` elements)
/// - Legacy `packages.config` (`<package>` elements)
/// - `paket.lock` (NUGET section entries)
pub struct DotNetAnalyzer;

impl DotNetAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl super::Analyzer for DotNetAnalyzer {
    fn id(&self) -> &'static str {
        "nuget"
    }

    fn language(&self) -> Language {
        Language::Dotnet
    }

    fn patterns(&self) -> &'static [&'static str] {
        &["*.csproj", "*.fsproj", "packages.config", "paket.lock"]
    }

    fn analyze(&self, path: &Path) -> Result<Analysis> {
        let content = read_manifest(path)?;
        let mut analysis = Analysis::new(path);
        let graph = &mut analysis.graph;

        match path.file_name().and_then(|n| n.to_str()) {
            Some("paket.lock") => parse_paket_lock(graph, path, &content)?,
            Some("packages.config") => {
                let packages = parse_xml_packages(&content, "package", "id", "version")
                    .map_err(|e| ScanError::parse(path, e))?;
                register_all(graph, path, packages);
            }
            _ => {
                let packages = parse_xml_packages(&content, "PackageReference", "Include", "Version")
                    .map_err(|e| ScanError::parse(path, e))?;
                register_all(graph, path, packages);
            }
        }

        Ok(analysis)
    }
}

fn register_all(graph: &mut FileGraph, path: &Path, packages: Vec<(String, String)>) {
    for (name, version) in packages {
        match Component::nuget(&name, &version) {
            Ok(component) => {
                graph.register_usage(component, true, None);
            }
            Err(err) => {
                // Central package management leaves Version off the reference.
                debug!(path = %path.display(), error = %err, "skipping package reference");
                graph.register_parse_failure(name);
            }
        }
    }
}

/// Collect `(name, version)` attribute pairs from every `tag` element.
/// A `<Version>` child element is accepted in place of the attribute.
fn parse_xml_packages(
    content: &str,
    tag: &str,
    name_attr: &str,
    version_attr: &str,
) -> Result<Vec<(String, String)>, quick_xml::Error> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut packages = Vec::new();
    let mut open: Option<(String, String)> = None;
    let mut in_version = false;

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Empty(e) | Event::Start(e) => {
                let element = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if element == tag {
                    let mut name = String::new();
                    let mut version = String::new();
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                        let value = attr.unescape_value()?.into_owned();
                        if key == name_attr {
                            name = value;
                        } else if key == version_attr {
                            version = value;
                        }
                    }
                    if name.is_empty() {
                        continue;
                    }
                    if matches!(event, Event::Empty(_)) {
                        packages.push((name, version));
                    } else {
                        open = Some((name, version));
                    }
                } else if element == version_attr && open.is_some() {
                    in_version = matches!(event, Event::Start(_));
                }
            }
            Event::Text(e) if in_version => {
                if let Some((_, version)) = open.as_mut() {
                    *version = e.unescape()?.trim().to_string();
                }
            }
            Event::End(e) => {
                let element = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if element == tag {
                    packages.extend(open.take());
                }
                in_version = false;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(packages)
}

/// `paket.lock`: resolved packages at four spaces of indentation, their
/// dependencies below them at six.
fn parse_paket_lock(graph: &mut FileGraph, path: &Path, content: &str) -> Result<()> {
    let package_re = Regex::new(r"^\s{4}(\S+)\s+\(([^)]+)\)")?;
    let dependency_re = Regex::new(r"^\s{6}(\S+)\s+\((.+)\)")?;
    let version_re = Regex::new(r"\d+(?:\.\d+)*")?;

    struct Entry {
        name: String,
        version: String,
        dependencies: Vec<(String, String)>,
    }

    let mut entries: Vec<Entry> = Vec::new();
    let mut in_nuget = false;

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        // A new top-level section (no leading spaces) ends the NUGET block
        if !line.starts_with(' ') {
            in_nuget = line.trim().eq_ignore_ascii_case("NUGET");
            continue;
        }
        if !in_nuget || line.trim_start().starts_with("remote:") {
            continue;
        }
        if let Some(caps) = package_re.captures(line) {
            entries.push(Entry {
                name: caps[1].to_string(),
                version: caps[2].trim().to_string(),
                dependencies: Vec::new(),
            });
        } else if let Some(caps) = dependency_re.captures(line) {
            if let Some(entry) = entries.last_mut() {
                entry.dependencies.push((caps[1].to_string(), caps[2].to_string()));
            }
        }
    }

    let resolved: HashMap<String, &str> = entries
        .iter()
        .map(|e| (e.name.to_lowercase(), e.version.as_str()))
        .collect();

    for entry in &entries {
        let parent = match Component::nuget(&entry.name, &entry.version) {
            Ok(component) => graph.register_usage(component, true, None),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping paket entry");
                graph.register_parse_failure(format!("{} ({})", entry.name, entry.version));
                continue;
            }
        };

        for (name, spec) in &entry.dependencies {
            // Prefer the version Paket resolved, else the lower bound of the constraint.
            let version = resolved
                .get(&name.to_lowercase())
                .copied()
                .or_else(|| version_re.find(spec).map(|m| m.as_str()));
            match version.map(|v| Component::nuget(name, v)) {
                Some(Ok(child)) => {
                    graph.register_usage(child, false, Some(&parent));
                }
                _ => graph.register_parse_failure(format!("{name} ({spec})")),
            }
        }
    }

    Ok(())
}
