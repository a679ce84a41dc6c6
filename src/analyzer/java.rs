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

/// Analyzer for Java/Kotlin projects managed by Maven or Gradle.
///
/// `pom.xml` and `build.gradle` / `build.gradle.kts` declare direct
/// dependencies; `gradle.lockfile` lists the whole resolved classpath, so
/// its entries are recorded as transitive.
pub struct JavaAnalyzer;

impl JavaAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl super::Analyzer for JavaAnalyzer {
    fn id(&self) -> &'static str {
        "maven"
    }

    fn language(&self) -> Language {
        Language::Java
    }

    fn patterns(&self) -> &'static [&'static str] {
        &["pom.xml", "build.gradle", "build.gradle.kts", "gradle.lockfile"]
    }

    fn analyze(&self, path: &Path) -> Result<Analysis> {
        let content = read_manifest(path)?;
        let mut analysis = Analysis::new(path);
        let graph = &mut analysis.graph;

        match path.file_name().and_then(|n| n.to_str()) {
            Some("pom.xml") => {
                for coordinate in parse_pom_xml(&content).map_err(|e| ScanError::parse(path, e))? {
                    register(graph, path, &coordinate, true);
                }
            }
            Some("gradle.lockfile") => {
                for coordinate in parse_gradle_lockfile(&content)? {
                    register(graph, path, &coordinate, false);
                }
            }
            _ => {
                for coordinate in parse_build_gradle(&content)? {
                    register(graph, path, &coordinate, true);
                }
            }
        }

        Ok(analysis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Coordinate {
    group_id: String,
    artifact_id: String,
    version: String,
}

impl Coordinate {
    fn new(group_id: &str, artifact_id: &str, version: &str) -> Self {
        Self {
            group_id: group_id.trim().to_string(),
            artifact_id: artifact_id.trim().to_string(),
            version: version.trim().to_string(),
        }
    }
}

/// Versions still holding a `${property}` reference are not resolved here.
fn register(graph: &mut FileGraph, path: &Path, coordinate: &Coordinate, explicit: bool) {
    let entry = format!(
        "{}:{}:{}",
        coordinate.group_id, coordinate.artifact_id, coordinate.version
    );
    if coordinate.version.contains("${") {
        debug!(path = %path.display(), entry = %entry, "unresolved property in version");
        graph.register_parse_failure(entry);
        return;
    }
    match Component::maven(&coordinate.group_id, &coordinate.artifact_id, &coordinate.version) {
        Ok(component) => {
            graph.register_usage(component, explicit, None);
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping dependency");
            graph.register_parse_failure(entry);
        }
    }
}

/// Parse the `<dependencies>` of a `pom.xml` using the quick-xml event API.
/// Entries under `<dependencyManagement>` or `<plugins>` are not usages.
fn parse_pom_xml(content: &str) -> Result<Vec<Coordinate>, quick_xml::Error> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut coordinates = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<Coordinate> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if name == "dependency" && is_usage_section(&stack) {
                    current = Some(Coordinate::default());
                }
                stack.push(name);
            }
            Event::End(_) => {
                if stack.pop().as_deref() == Some("dependency") {
                    if let Some(coordinate) = current.take() {
                        if !coordinate.artifact_id.is_empty() {
                            coordinates.push(coordinate);
                        }
                    }
                }
            }
            Event::Text(e) => {
                let in_dependency = stack.iter().rev().nth(1).map(String::as_str) == Some("dependency");
                if let Some(coordinate) = current.as_mut().filter(|_| in_dependency) {
                    let text = e.unescape()?.trim().to_string();
                    match stack.last().map(String::as_str) {
                        Some("groupId") => coordinate.group_id = text,
                        Some("artifactId") => coordinate.artifact_id = text,
                        Some("version") => coordinate.version = text,
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(coordinates)
}

fn is_usage_section(stack: &[String]) -> bool {
    stack.last().map(String::as_str) == Some("dependencies")
        && !stack
            .iter()
            .any(|tag| tag == "dependencyManagement" || tag == "plugin")
}

/// Parse `build.gradle` or `build.gradle.kts` with regex.
fn parse_build_gradle(content: &str) -> Result<Vec<Coordinate>> {
    let configurations = "implementation|api|compileOnly|runtimeOnly|testImplementation|testRuntimeOnly|annotationProcessor|kapt";

    // implementation 'group:artifact:version' / implementation("group:artifact:version")
    let re_shorthand = Regex::new(&format!(
        r#"(?:{configurations})\s*\(?\s*['"]([^'":]+):([^'":]+):([^'":@]+)(?:@[^'"]+)?['"]"#
    ))?;
    // implementation group: 'com.example', name: 'foo', version: '1.0'
    let re_map = Regex::new(&format!(
        r#"(?:{configurations})\s*\(?\s*group:\s*['"]([^'"]+)['"]\s*,\s*name:\s*['"]([^'"]+)['"]\s*,\s*version:\s*['"]([^'"]+)['"]"#
    ))?;

    let shorthand = re_shorthand.captures_iter(content);
    let map = re_map.captures_iter(content);
    Ok(shorthand
        .chain(map)
        .map(|caps| Coordinate::new(&caps[1], &caps[2], &caps[3]))
        .collect())
}

/// Parse `gradle.lockfile`: `group:artifact:version=configuration,...`.
fn parse_gradle_lockfile(content: &str) -> Result<Vec<Coordinate>> {
    let re = Regex::new(r"^([^:=\s]+):([^:=\s]+):([^=\s]+)=")?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| re.captures(line))
        .map(|caps| Coordinate::new(&caps[1], &caps[2], &caps[3]))
        .collect())
}
