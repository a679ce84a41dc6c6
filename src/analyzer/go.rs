use std::path::Path;

use anyhow::Result;
use regex::Regex;
use tracing::warn;

use crate::error::read_manifest;
use crate::graph::FileGraph;
use crate::models::Component;

use super::{Analysis, Language};

/// Analyzer for Go modules.
///
/// `go.mod` requirements are direct unless marked `// indirect`.
/// `go.sum` holds every module in the build list together with its `h1:`
/// hash, so all of its entries are transitive.
pub struct GoAnalyzer;

impl GoAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl super::Analyzer for GoAnalyzer {
    fn id(&self) -> &'static str {
        "go"
    }

    fn language(&self) -> Language {
        Language::Go
    }

    fn patterns(&self) -> &'static [&'static str] {
        &["go.mod", "go.sum"]
    }

    fn analyze(&self, path: &Path) -> Result<Analysis> {
        let content = read_manifest(path)?;
        let mut analysis = Analysis::new(path);

        match path.file_name().and_then(|n| n.to_str()) {
            Some("go.sum") => parse_go_sum(&mut analysis.graph, path, &content)?,
            _ => parse_go_mod(&mut analysis.graph, path, &content),
        }

        Ok(analysis)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Requirement<'a> {
    module: &'a str,
    version: &'a str,
    indirect: bool,
}

/// `require` statements of a `go.mod`, both the single-line and the block form.
fn go_mod_requirements(content: &str) -> Vec<Result<Requirement<'_>, &str>> {
    let mut requirements = Vec::new();
    let mut in_block = false;

    for line in content.lines().map(str::trim) {
        if in_block {
            if line.starts_with(')') {
                in_block = false;
            } else if !line.is_empty() && !line.starts_with("//") {
                requirements.push(requirement(line));
            }
            continue;
        }

        let Some(rest) = line.strip_prefix("require") else {
            continue;
        };
        if rest.trim_start().starts_with('(') {
            in_block = true;
        } else if rest.starts_with(char::is_whitespace) {
            requirements.push(requirement(rest.trim()));
        }
    }

    requirements
}

fn requirement(line: &str) -> Result<Requirement<'_>, &str> {
    let (spec, comment) = match line.split_once("//") {
        Some((spec, comment)) => (spec, Some(comment)),
        None => (line, None),
    };
    let mut parts = spec.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(module), Some(version), None) => Ok(Requirement {
            module,
            version,
            indirect: comment.is_some_and(|c| c.trim() == "indirect"),
        }),
        _ => Err(line),
    }
}

fn parse_go_mod(graph: &mut FileGraph, path: &Path, content: &str) {
    for requirement in go_mod_requirements(content) {
        let Requirement {
            module,
            version,
            indirect,
        } = match requirement {
            Ok(requirement) => requirement,
            Err(line) => {
                warn!(path = %path.display(), line = %line, "unparsable require line");
                graph.register_parse_failure(line);
                continue;
            }
        };
        match Component::go(module, version, None) {
            Ok(component) => {
                graph.register_usage(component, !indirect, None);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping requirement");
                graph.register_parse_failure(format!("{module} {version}"));
            }
        }
    }
}

/// `go.sum`: `module version[/go.mod] h1:hash`. The `/go.mod` lines only
/// vouch for the module file, the other form for the module content.
fn parse_go_sum(graph: &mut FileGraph, path: &Path, content: &str) -> Result<()> {
    let re = Regex::new(r"^(\S+)\s+(\S+?)(/go\.mod)?\s+(\S+)$")?;

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(caps) = re.captures(line) else {
            warn!(path = %path.display(), line = %line, "unparsable go.sum line");
            graph.register_parse_failure(line);
            continue;
        };
        if caps.get(3).is_some() {
            continue;
        }
        match Component::go(&caps[1], &caps[2], Some(&caps[4])) {
            Ok(component) => {
                graph.register_usage(component, false, None);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping go.sum entry");
                graph.register_parse_failure(line);
            }
        }
    }

    Ok(())
}
